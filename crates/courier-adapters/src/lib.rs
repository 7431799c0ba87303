//! Representative provider adapters exercising the adapter contract: an
//! XML/form-urlencoded outbound SMS provider, a keyword/multipart-SMS
//! inbound provider, and a JWT-signed-webhook provider. Not an exhaustive
//! catalog — just enough distinct shapes to prove the contract holds.

mod ac;
mod mbd;
mod mt;

pub use ac::ArabiacellHandler;
pub use mbd::MessagebirdHandler;
pub use mt::MtHandler;
