//! Lua script bodies backing the atomic multi-step keyspace operations of
//! the priority queue. Each script is invoked once per logical operation so
//! no intermediate state is ever observable to another worker.
//!
//! Mirrors the leader-election convention of expressing a check-and-mutate
//! sequence as a single `redis::Script` rather than a client-side
//! `MULTI`/`EXEC` transaction.

use redis::Script;

/// `enqueue`: ZADD the head entry onto the channel queue and register the
/// channel in `T:active`; stage any remaining array elements (a
/// multi-element push) into the channel's future-staging set and record the
/// channel in the `T:future` coordinator set scored by the earliest pending
/// entry.
///
/// KEYS: [queue_member, active_key, future_coordinator_key]
/// ARGV: [head_json, base_score, rest_count, (entry, score)*]
pub fn enqueue_script() -> Script {
    Script::new(
        r#"
        local q_key = KEYS[1]
        local active_key = KEYS[2]
        local future_coord_key = KEYS[3]

        local head = ARGV[1]
        local base_score = tonumber(ARGV[2])
        local rest_count = tonumber(ARGV[3])

        redis.call('ZADD', q_key, base_score, head)
        redis.call('ZINCRBY', active_key, 0, q_key)

        if rest_count > 0 then
            local future_key = q_key .. ':future'
            local idx = 4
            local min_score = nil
            for _ = 1, rest_count do
                local entry = ARGV[idx]
                local score = tonumber(ARGV[idx + 1])
                redis.call('ZADD', future_key, score, entry)
                if min_score == nil or score < min_score then
                    min_score = score
                end
                idx = idx + 2
            end
            redis.call('ZADD', future_coord_key, min_score, q_key)
        end

        return 1
        "#,
    )
}

/// `dequeue`: pop the lowest-scored channel from `T:active`, apply
/// per-second TPS throttling and the overall/bulk rate-limit markers, and
/// ZPOP the channel's lowest-scored entry.
///
/// Returns one of `{"EMPTY"}`, `{"RETRY"}`, or `{"OK", member, entry_json}`.
///
/// KEYS: [active_key, throttled_key]
/// ARGV: [unix_second, rate_counter_ttl_secs]
pub fn dequeue_script() -> Script {
    Script::new(
        r#"
        local active_key = KEYS[1]
        local throttled_key = KEYS[2]
        local unix_second = tonumber(ARGV[1])
        local ttl = ARGV[2]

        local head = redis.call('ZRANGE', active_key, 0, 0, 'WITHSCORES')
        if #head == 0 then
            return {'EMPTY'}
        end
        local member = head[1]
        local active_score = tonumber(head[2])

        local tps_str = string.match(member, '|(%d+)$')
        local tps = tonumber(tps_str) or 0

        if tps > 0 then
            local rate_key = member .. ':tps:' .. unix_second
            local count = tonumber(redis.call('GET', rate_key) or '0')
            if count >= tps then
                redis.call('ZREM', active_key, member)
                redis.call('ZINCRBY', throttled_key, active_score, member)
                return {'RETRY'}
            end
            redis.call('INCR', rate_key)
            redis.call('EXPIRE', rate_key, ttl)
        end

        local channel_uuid = string.match(member, ':(.-)|')
        if channel_uuid then
            local head_entry = redis.call('ZRANGE', member, 0, 0, 'WITHSCORES')
            if #head_entry > 0 then
                local entry_score = tonumber(head_entry[2])
                local now_micros = unix_second * 1000000
                -- Low/Bulk priority offset is +24h; treat anything more than
                -- 12h out as bulk for rate-limit-marker purposes.
                if entry_score - now_micros > 12 * 3600 * 1000000 then
                    local blocked = redis.call('EXISTS', 'rate_limit:' .. channel_uuid) == 1
                        or redis.call('EXISTS', 'rate_limit_bulk:' .. channel_uuid) == 1
                    if blocked then
                        return {'RETRY'}
                    end
                end
            end
        end

        local popped = redis.call('ZPOPMIN', member)
        if #popped == 0 then
            redis.call('ZREM', active_key, member)
            return {'EMPTY'}
        end
        local entry_json = popped[1]

        redis.call('ZINCRBY', active_key, 1, member)
        if redis.call('ZCARD', member) == 0 then
            redis.call('ZREM', active_key, member)
        end
        redis.call('HSET', active_key .. ':last_pop', member, unix_second)

        return {'OK', member, entry_json}
        "#,
    )
}

/// `mark_complete`: ZADD-XX-style conditional decrement on `T:throttled`
/// (channel was being throttle-accounted); otherwise decrement `T:active`,
/// clamped at zero.
///
/// KEYS: [active_key, throttled_key]
/// ARGV: [member]
pub fn mark_complete_script() -> Script {
    Script::new(
        r#"
        local active_key = KEYS[1]
        local throttled_key = KEYS[2]
        local member = ARGV[1]

        local existed = redis.call('ZSCORE', throttled_key, member)
        if existed then
            local new_score = tonumber(redis.call('ZINCRBY', throttled_key, -1, member))
            if new_score <= 0 then
                redis.call('ZREM', throttled_key, member)
            end
            return 1
        end

        local new_active = tonumber(redis.call('ZINCRBY', active_key, -1, member))
        if new_active < 0 then
            redis.call('ZADD', active_key, 0, member)
        end
        return 0
        "#,
    )
}

/// `dethrottle_sweep`: move every member of `T:throttled` into `T:active`,
/// summing scores, then clear `T:throttled`. Run once per second, aligned to
/// the second boundary so per-second TPS counters roll over first.
///
/// KEYS: [throttled_key, active_key]
pub fn dethrottle_script() -> Script {
    Script::new(
        r#"
        local throttled_key = KEYS[1]
        local active_key = KEYS[2]

        local members = redis.call('ZRANGE', throttled_key, 0, -1, 'WITHSCORES')
        local moved = 0
        local i = 1
        while i <= #members do
            local member = members[i]
            local score = tonumber(members[i + 1])
            redis.call('ZINCRBY', active_key, score, member)
            moved = moved + 1
            i = i + 2
        end
        redis.call('DEL', throttled_key)
        return moved
        "#,
    )
}

/// `promote_future`: move due elements (score <= now) from a channel's
/// future-staging set into its live queue, and drop the channel from the
/// `T:future` coordinator set once its staging set drains.
///
/// KEYS: [pending_future_key, queue_member, future_coordinator_key]
/// ARGV: [now_micros, queue_member]
pub fn promote_future_script() -> Script {
    Script::new(
        r#"
        local future_key = KEYS[1]
        local q_key = KEYS[2]
        local coord_key = KEYS[3]
        local now = tonumber(ARGV[1])
        local member = ARGV[2]

        local due = redis.call('ZRANGEBYSCORE', future_key, '-inf', now, 'WITHSCORES')
        local moved = 0
        local i = 1
        while i <= #due do
            local entry = due[i]
            local score = due[i + 1]
            redis.call('ZADD', q_key, score, entry)
            redis.call('ZREM', future_key, entry)
            moved = moved + 1
            i = i + 2
        end

        if redis.call('ZCARD', future_key) == 0 then
            redis.call('ZREM', coord_key, member)
        end

        return moved
        "#,
    )
}

/// `watchdog_sweep`: scan `T:active` for channels whose score is stale (no
/// pop recorded in `last_pop` within `max_idle_secs`) and clamp their score
/// to zero, self-healing accounting drift from crashed workers.
///
/// KEYS: [active_key]
/// ARGV: [now_unix_secs, max_idle_secs]
pub fn watchdog_script() -> Script {
    Script::new(
        r#"
        local active_key = KEYS[1]
        local last_pop_key = active_key .. ':last_pop'
        local now = tonumber(ARGV[1])
        local max_idle = tonumber(ARGV[2])

        local members = redis.call('ZRANGE', active_key, 0, -1, 'WITHSCORES')
        local healed = 0
        local i = 1
        while i <= #members do
            local member = members[i]
            local score = tonumber(members[i + 1])
            if score > 0 then
                local last_pop = redis.call('HGET', last_pop_key, member)
                local idle = last_pop and (now - tonumber(last_pop)) or max_idle + 1
                if idle > max_idle then
                    redis.call('ZADD', active_key, 0, member)
                    healed = healed + 1
                end
            end
            i = i + 2
        end
        return healed
        "#,
    )
}
