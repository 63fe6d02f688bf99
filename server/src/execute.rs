//! Command execution - bridges parsed requests to store operations.
//!
//! The command set is closed, so dispatch is a flat match on the first
//! argument with the arity folded into the pattern. Each handler appends one
//! typed value to the output buffer; the connection wraps it in a response
//! frame.

use crate::metrics::{DELETES, GETS, REQUESTS, SETS};
use bytes::BytesMut;
use protocol_wire::value::{ErrorCode, put_arr, put_dbl, put_err, put_int, put_nil, put_str};
use store::{Store, Value, WrongType};

/// Execute one request against the store, appending the typed response.
pub fn execute(args: &[&[u8]], store: &mut Store, now_ms: u64, out: &mut BytesMut) {
    REQUESTS.increment();
    match args {
        [cmd] if cmd.eq_ignore_ascii_case(b"ping") => put_str(out, b"pong"),
        [cmd, key] if cmd.eq_ignore_ascii_case(b"get") => get(key, store, out),
        [cmd, key, val] if cmd.eq_ignore_ascii_case(b"set") => set(key, val, store, out),
        [cmd, key] if cmd.eq_ignore_ascii_case(b"del") => del(key, store, out),
        [cmd] if cmd.eq_ignore_ascii_case(b"keys") => keys(store, out),
        [cmd, key, ttl] if cmd.eq_ignore_ascii_case(b"pexpire") => {
            pexpire(key, ttl, store, now_ms, out)
        }
        [cmd, key] if cmd.eq_ignore_ascii_case(b"pttl") => pttl(key, store, now_ms, out),
        [cmd, key, score, name] if cmd.eq_ignore_ascii_case(b"zadd") => {
            zadd(key, score, name, store, out)
        }
        [cmd, key, name] if cmd.eq_ignore_ascii_case(b"zrem") => zrem(key, name, store, out),
        [cmd, key, name] if cmd.eq_ignore_ascii_case(b"zscore") => zscore(key, name, store, out),
        [cmd, key, score, name, offset, limit] if cmd.eq_ignore_ascii_case(b"zquery") => {
            zquery(key, score, name, offset, limit, store, out)
        }
        _ => put_err(out, ErrorCode::Unknown, "unknown command"),
    }
}

fn get(key: &[u8], store: &mut Store, out: &mut BytesMut) {
    GETS.increment();
    match store.get(key) {
        Ok(Some(val)) => put_str(out, val),
        Ok(None) => put_nil(out),
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect string"),
    }
}

fn set(key: &[u8], val: &[u8], store: &mut Store, out: &mut BytesMut) {
    SETS.increment();
    match store.set(key, val) {
        Ok(()) => put_nil(out),
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect string"),
    }
}

fn del(key: &[u8], store: &mut Store, out: &mut BytesMut) {
    DELETES.increment();
    put_int(out, store.del(key) as i64);
}

/// One "KEY : VALUE" string per entry, across both index tables.
fn keys(store: &mut Store, out: &mut BytesMut) {
    put_arr(out, store.len() as u32);
    store.scan(|key, val| {
        let mut line = Vec::with_capacity(key.len() + 16);
        line.extend_from_slice(key);
        line.extend_from_slice(b" : ");
        match val {
            Value::Str(v) => line.extend_from_slice(v),
            Value::Sorted(z) => line.extend_from_slice(format!("zset({})", z.len()).as_bytes()),
        }
        put_str(out, &line);
    });
}

fn pexpire(key: &[u8], ttl: &[u8], store: &mut Store, now_ms: u64, out: &mut BytesMut) {
    let Some(ttl_ms) = parse_int(ttl) else {
        return put_err(out, ErrorCode::BadArg, "expect int");
    };
    put_int(out, store.expire(key, ttl_ms, now_ms) as i64);
}

fn pttl(key: &[u8], store: &mut Store, now_ms: u64, out: &mut BytesMut) {
    put_int(out, store.ttl(key, now_ms));
}

fn zadd(key: &[u8], score: &[u8], name: &[u8], store: &mut Store, out: &mut BytesMut) {
    let Some(score) = parse_float(score) else {
        return put_err(out, ErrorCode::BadArg, "expect float");
    };
    match store.zadd(key, name, score) {
        Ok(added) => put_int(out, added as i64),
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect zset"),
    }
}

fn zrem(key: &[u8], name: &[u8], store: &mut Store, out: &mut BytesMut) {
    match store.zrem(key, name) {
        Ok(removed) => put_int(out, removed as i64),
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect zset"),
    }
}

fn zscore(key: &[u8], name: &[u8], store: &mut Store, out: &mut BytesMut) {
    match store.zscore(key, name) {
        Ok(Some(score)) => put_dbl(out, score),
        Ok(None) => put_nil(out),
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect zset"),
    }
}

fn zquery(
    key: &[u8],
    score: &[u8],
    name: &[u8],
    offset: &[u8],
    limit: &[u8],
    store: &mut Store,
    out: &mut BytesMut,
) {
    let Some(score) = parse_float(score) else {
        return put_err(out, ErrorCode::BadArg, "expect fp number");
    };
    let (Some(offset), Some(limit)) = (parse_int(offset), parse_int(limit)) else {
        return put_err(out, ErrorCode::BadArg, "expect int");
    };
    let limit = if limit <= 0 { 0 } else { limit as usize };
    match store.zquery(key, score, name, offset, limit) {
        Ok(members) => {
            put_arr(out, (members.len() * 2) as u32);
            for (name, score) in members {
                put_str(out, name);
                put_dbl(out, score);
            }
        }
        Err(WrongType) => put_err(out, ErrorCode::BadType, "expect zset"),
    }
}

fn parse_int(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Floats accept "inf"/"-inf"; NaN is rejected.
fn parse_float(arg: &[u8]) -> Option<f64> {
    let parsed: f64 = std::str::from_utf8(arg).ok()?.parse().ok()?;
    (!parsed.is_nan()).then_some(parsed)
}
