//! Protocol message encoding

use super::constants::tags;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            encode_startup(&mut buf, *version, params)?;
        }
        FrontendMessage::Password(password) => {
            encode_terminated(&mut buf, password.as_bytes())?;
        }
        FrontendMessage::CredentialResponse(data) => {
            encode_terminated(&mut buf, data)?;
        }
        FrontendMessage::ChallengeResponse(data) | FrontendMessage::GssResponse(data) => {
            encode_unterminated(&mut buf, data)?;
        }
        FrontendMessage::Query(query) => {
            encode_query(&mut buf, query)?;
        }
        FrontendMessage::Terminate => {
            encode_terminate(&mut buf)?;
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            encode_sasl_initial_response(&mut buf, mechanism, data)?;
        }
        FrontendMessage::SaslResponse { data } => {
            encode_unterminated(&mut buf, data)?;
        }
        FrontendMessage::SslRequest => {
            encode_ssl_request(&mut buf)?;
        }
    }

    Ok(buf)
}

fn reject_nul(field: &str, value: &str) -> io::Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} contains a NUL byte", field),
        ));
    }
    Ok(())
}

fn patch_len(buf: &mut BytesMut, len_pos: usize) -> io::Result<()> {
    let len = i32::try_from(buf.len() - len_pos)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn encode_startup(buf: &mut BytesMut, version: i32, params: &[(String, String)]) -> io::Result<()> {
    // Startup messages don't have a type byte
    let len_pos = buf.len();
    buf.put_i32(0);

    buf.put_i32(version);

    for (key, value) in params {
        reject_nul("startup parameter name", key)?;
        reject_nul("startup parameter value", value)?;
        buf.put(key.as_bytes());
        buf.put_u8(0);
        buf.put(value.as_bytes());
        buf.put_u8(0);
    }

    // Final null terminator
    buf.put_u8(0);

    patch_len(buf, len_pos)
}

/// `'p'`, length, payload, NUL
fn encode_terminated(buf: &mut BytesMut, payload: &[u8]) -> io::Result<()> {
    buf.put_u8(tags::PASSWORD_MESSAGE);
    let len_pos = buf.len();
    buf.put_i32(0);

    buf.put_slice(payload);
    buf.put_u8(0);

    patch_len(buf, len_pos)
}

/// `'p'`, length, payload
fn encode_unterminated(buf: &mut BytesMut, payload: &[u8]) -> io::Result<()> {
    buf.put_u8(tags::PASSWORD_MESSAGE);
    let len_pos = buf.len();
    buf.put_i32(0);

    buf.put_slice(payload);

    patch_len(buf, len_pos)
}

fn encode_query(buf: &mut BytesMut, query: &str) -> io::Result<()> {
    reject_nul("query", query)?;
    buf.put_u8(b'Q');
    let len_pos = buf.len();
    buf.put_i32(0);

    buf.put(query.as_bytes());
    buf.put_u8(0);

    patch_len(buf, len_pos)
}

fn encode_terminate(buf: &mut BytesMut) -> io::Result<()> {
    buf.put_u8(b'X');
    buf.put_i32(4); // Length includes itself
    Ok(())
}

fn encode_sasl_initial_response(
    buf: &mut BytesMut,
    mechanism: &str,
    data: &[u8],
) -> io::Result<()> {
    reject_nul("SASL mechanism", mechanism)?;
    buf.put_u8(tags::PASSWORD_MESSAGE);
    let len_pos = buf.len();
    buf.put_i32(0);

    // Mechanism name (null-terminated)
    buf.put(mechanism.as_bytes());
    buf.put_u8(0);

    // SASL data (as length-prefixed bytes)
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);

    patch_len(buf, len_pos)
}

fn encode_ssl_request(buf: &mut BytesMut) -> io::Result<()> {
    buf.put_i32(8); // Length (includes itself)
    buf.put_i32(super::constants::SSL_REQUEST_CODE);
    Ok(())
}
