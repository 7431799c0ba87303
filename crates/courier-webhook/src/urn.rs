//! Minimal sender-address parsing: enough to turn a provider's raw address
//! field into a typed `Urn` using the channel's country code, for the
//! `tel:`/`whatsapp:`/`ext:` prefixes these demo adapters actually need.
//! General E.164 validation/formatting is out of scope; this is not a
//! phonenumber library.

use courier_common::Urn;

/// ISO 3166-1 alpha-2 → ITU calling code, just the countries exercised by
/// this workspace's demo adapters and tests.
const CALLING_CODES: &[(&str, &str)] = &[("RW", "250"), ("PK", "92"), ("NL", "31"), ("US", "1"), ("GB", "44")];

fn calling_code(country: &str) -> Option<&'static str> {
    CALLING_CODES.iter().find(|(code, _)| code.eq_ignore_ascii_case(country)).map(|(_, dial)| *dial)
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Parses `raw` as a sender address for a channel whose accepted schemes
/// are `schemes` (checked in order, first match wins) and whose country is
/// `country`. Returns a stable failure reason string on error, matching
/// the webhook router's 400 contract.
pub fn parse_sender_urn(schemes: &[String], country: &str, raw: &str) -> Result<Urn, &'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("not a possible number");
    }

    if schemes.iter().any(|s| s == "whatsapp") {
        if all_digits(raw) {
            return Ok(Urn::new("whatsapp", raw));
        }
        return Err("invalid whatsapp id");
    }

    if let Some(rest) = raw.strip_prefix('+') {
        if all_digits(rest) && (8..=15).contains(&rest.len()) {
            return Ok(Urn::tel(raw));
        }
        return Err("not a possible number");
    }

    let national = raw.strip_prefix('0').unwrap_or(raw);
    if !all_digits(national) {
        return Err("not a possible number");
    }
    let code = calling_code(country).ok_or("not a possible number")?;
    let e164 = format!("+{code}{national}");
    if (9..=16).contains(&e164.len()) {
        Ok(Urn::tel(e164))
    } else {
        Err("not a possible number")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_address_passes_through() {
        let urn = parse_sender_urn(&["tel".to_string()], "RW", "+250788383383").unwrap();
        assert_eq!(urn.path, "+250788383383");
    }

    #[test]
    fn national_number_gains_country_calling_code() {
        let urn = parse_sender_urn(&["tel".to_string()], "RW", "0788383383").unwrap();
        assert_eq!(urn.path, "+250788383383");
    }

    #[test]
    fn whatsapp_scheme_takes_priority() {
        let urn = parse_sender_urn(&["whatsapp".to_string()], "RW", "12025551234").unwrap();
        assert_eq!(urn.scheme, "whatsapp");
    }

    #[test]
    fn empty_address_is_rejected() {
        assert!(parse_sender_urn(&["tel".to_string()], "RW", "").is_err());
    }

    #[test]
    fn unknown_country_without_plus_is_rejected() {
        assert!(parse_sender_urn(&["tel".to_string()], "ZZ", "788383383").is_err());
    }
}
