//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription};
use bytes::{Bytes, BytesMut};
use std::io;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds this value is rejected before allocation
/// so a crafted length header cannot force a huge buffer.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Decode a backend message from the front of `data`
///
/// Returns the message and the number of bytes it occupied. The caller must
/// advance the buffer after calling this. An `UnexpectedEof` error means the
/// buffer does not yet hold a whole frame.
pub fn decode_message(data: &mut BytesMut) -> io::Result<(BackendMessage, usize)> {
    if data.len() < 5 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message header",
        ));
    }

    let tag = data[0];
    let declared = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if declared < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid message length {}", declared),
        ));
    }
    let len = declared as usize;

    if len > MAX_MESSAGE_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message length {} exceeds maximum allowed {}",
                len, MAX_MESSAGE_LENGTH
            ),
        ));
    }

    if data.len() < len + 1 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }

    let body = &data[5..len + 1];

    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(body)?,
        tags::BACKEND_KEY_DATA => decode_backend_key_data(body)?,
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(Reader::new(body).cstr()?),
        tags::DATA_ROW => decode_data_row(body)?,
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
        tags::PARAMETER_STATUS => decode_parameter_status(body)?,
        tags::READY_FOR_QUERY => decode_ready_for_query(body)?,
        tags::ROW_DESCRIPTION => decode_row_description(body)?,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message tag: {:?}", tag as char),
            ))
        }
    };

    Ok((msg, len + 1))
}

/// Bounds-checked cursor over a frame body
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn take(&mut self, n: usize, what: &'static str) -> io::Result<&'a [u8]> {
        if self.data.len() - self.offset < n {
            // The frame is already whole here, so a short field is malformed
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("truncated {}", what),
            ));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn i16(&mut self, what: &'static str) -> io::Result<i16> {
        let b = self.take(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &'static str) -> io::Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> io::Result<String> {
        let end = self.remaining().iter().position(|&b| b == 0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "missing null terminator in string",
            )
        })?;
        let value = String::from_utf8_lossy(&self.data[self.offset..self.offset + end]).into_owned();
        self.offset += end + 1;
        Ok(value)
    }
}

/// NUL-separated list terminated by an empty entry or the end of the body
fn decode_mechanism_list(data: &[u8]) -> Vec<String> {
    data.split(|&b| b == 0)
        .take_while(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

fn decode_authentication(data: &[u8]) -> io::Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let auth_type = reader.i32("auth type")?;
    let rest = reader.remaining();

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let salt_bytes = reader.take(4, "salt data")?;
            let mut salt = [0u8; 4];
            salt.copy_from_slice(salt_bytes);
            AuthenticationMessage::Md5Password { salt }
        }
        auth::GSS => AuthenticationMessage::Gss,
        auth::GSS_CONTINUE => AuthenticationMessage::GssContinue {
            data: rest.to_vec(),
        },
        auth::SSPI => AuthenticationMessage::Sspi,
        auth::SASL => AuthenticationMessage::Sasl {
            mechanisms: decode_mechanism_list(rest),
        },
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: rest.to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: rest.to_vec(),
        },
        auth::NATIONAL_SASL => AuthenticationMessage::NationalSasl {
            mechanisms: decode_mechanism_list(rest),
        },
        auth::NATIONAL_SASL_CONTINUE => AuthenticationMessage::NationalSaslContinue {
            data: rest.to_vec(),
        },
        auth::NATIONAL_SASL_FINAL => AuthenticationMessage::NationalSaslFinal {
            data: rest.to_vec(),
        },
        auth::CHALLENGE => AuthenticationMessage::Challenge {
            data: rest.to_vec(),
        },
        auth::WATERMARK => AuthenticationMessage::Watermark,
        auth::MAC_ADDRESS => AuthenticationMessage::MacAddress,
        auth::APP_KEY => AuthenticationMessage::AppKey,
        auth::MAC_CODE => AuthenticationMessage::MacCode,
        other => AuthenticationMessage::Unsupported(other),
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> io::Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let process_id = reader.i32("backend key data")?;
    let secret_key = reader.i32("backend key data")?;
    Ok(BackendMessage::BackendKeyData {
        process_id,
        secret_key,
    })
}

fn decode_data_row(data: &[u8]) -> io::Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let field_count = reader.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(field_count);

    for _ in 0..field_count {
        let field_len = reader.i32("field length")?;
        let field = if field_len < 0 {
            None
        } else {
            Some(Bytes::copy_from_slice(
                reader.take(field_len as usize, "field data")?,
            ))
        };
        fields.push(field);
    }

    Ok(BackendMessage::DataRow(fields))
}

fn decode_error_fields(data: &[u8]) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut reader = Reader::new(data);

    while let Some(&field_type) = reader.remaining().first() {
        reader.offset += 1;
        if field_type == 0 {
            break;
        }
        let value = reader.cstr()?;

        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            _ => {} // Ignore unknown fields
        }
    }

    Ok(fields)
}

fn decode_parameter_status(data: &[u8]) -> io::Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let name = reader.cstr()?;
    let value = reader.cstr()?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_ready_for_query(data: &[u8]) -> io::Result<BackendMessage> {
    let status = Reader::new(data).take(1, "status byte")?[0];
    Ok(BackendMessage::ReadyForQuery { status })
}

fn decode_row_description(data: &[u8]) -> io::Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let field_count = reader.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(field_count);

    for _ in 0..field_count {
        let name = reader.cstr()?;
        fields.push(FieldDescription {
            name,
            table_oid: reader.i32("field descriptor")?,
            column_attr: reader.i16("field descriptor")?,
            type_oid: reader.i32("field descriptor")? as u32,
            type_size: reader.i16("field descriptor")?,
            type_modifier: reader.i32("field descriptor")?,
            format_code: reader.i16("field descriptor")?,
        });
    }

    Ok(BackendMessage::RowDescription(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_frame(code: i32, payload: &[u8]) -> BytesMut {
        let mut frame = vec![b'R'];
        frame.extend_from_slice(&((8 + payload.len()) as i32).to_be_bytes());
        frame.extend_from_slice(&code.to_be_bytes());
        frame.extend_from_slice(payload);
        BytesMut::from(&frame[..])
    }

    fn decode_auth(code: i32, payload: &[u8]) -> AuthenticationMessage {
        let mut data = auth_frame(code, payload);
        match decode_message(&mut data).unwrap().0 {
            BackendMessage::Authentication(msg) => msg,
            other => panic!("expected Authentication, got {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_authentication_ok() {
        let mut data = BytesMut::from(
            &[
                b'R', // Authentication
                0, 0, 0, 8, // Length = 8
                0, 0, 0, 0, // Auth OK
            ][..],
        );

        let (msg, consumed) = decode_message(&mut data).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::Ok)
        ));
        assert_eq!(consumed, 9); // 1 tag + 4 len + 4 auth type
    }

    #[test]
    fn test_decode_rejects_oversized_message() {
        let oversized_len = (super::MAX_MESSAGE_LENGTH as i32) + 1;
        let len_bytes = oversized_len.to_be_bytes();
        let mut data =
            BytesMut::from(&[b'D', len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]][..]);

        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_rejects_negative_length() {
        let mut data = BytesMut::from(&[b'R', 0xFF, 0xFF, 0xFF, 0xFF][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_incomplete_body_is_eof() {
        let mut data = BytesMut::from(&[b'R', 0, 0, 0, 12, 0, 0, 0, 5][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_complete_frame_with_short_md5_salt_is_invalid() {
        let mut data = BytesMut::from(&[b'R', 0, 0, 0, 8, 0, 0, 0, 5][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_ready_for_query_without_status_is_invalid() {
        let mut data = BytesMut::from(&[b'Z', 0, 0, 0, 4][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_short_backend_key_data_is_invalid() {
        let mut data = BytesMut::from(&[b'K', 0, 0, 0, 8, 0, 0, 0, 1][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_ready_for_query() {
        let mut data = BytesMut::from(
            &[
                b'Z', // ReadyForQuery
                0, 0, 0, 5,    // Length = 5
                b'I', // Idle
            ][..],
        );

        let (msg, consumed) = decode_message(&mut data).unwrap();
        match msg {
            BackendMessage::ReadyForQuery { status } => assert_eq!(status, b'I'),
            _ => panic!("expected ReadyForQuery"),
        }
        assert_eq!(consumed, 6); // 1 tag + 4 len + 1 status
    }

    #[test]
    fn test_decode_md5_salt() {
        assert_eq!(
            decode_auth(auth::MD5_PASSWORD, &[1, 2, 3, 4]),
            AuthenticationMessage::Md5Password { salt: [1, 2, 3, 4] }
        );
    }

    #[test]
    fn test_decode_sasl_mechanisms() {
        let msg = decode_auth(auth::SASL, b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        assert_eq!(
            msg,
            AuthenticationMessage::Sasl {
                mechanisms: vec!["SCRAM-SHA-256-PLUS".into(), "SCRAM-SHA-256".into()]
            }
        );
    }

    #[test]
    fn test_decode_national_sasl_codes() {
        assert_eq!(
            decode_auth(auth::NATIONAL_SASL, b"SCRAM-GM-256\0\0"),
            AuthenticationMessage::NationalSasl {
                mechanisms: vec!["SCRAM-GM-256".into()]
            }
        );
        assert_eq!(
            decode_auth(auth::NATIONAL_SASL_CONTINUE, b"r=abc"),
            AuthenticationMessage::NationalSaslContinue {
                data: b"r=abc".to_vec()
            }
        );
        assert_eq!(
            decode_auth(auth::NATIONAL_SASL_FINAL, b"v=xyz"),
            AuthenticationMessage::NationalSaslFinal {
                data: b"v=xyz".to_vec()
            }
        );
    }

    #[test]
    fn test_decode_challenge_blob_is_length_minus_eight() {
        let blob = vec![7u8; 38];
        match decode_auth(auth::CHALLENGE, &blob) {
            AuthenticationMessage::Challenge { data } => assert_eq!(data.len(), 38),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_vendor_requests() {
        assert_eq!(decode_auth(auth::WATERMARK, &[]), AuthenticationMessage::Watermark);
        assert_eq!(decode_auth(auth::MAC_ADDRESS, &[]), AuthenticationMessage::MacAddress);
        assert_eq!(decode_auth(auth::APP_KEY, &[]), AuthenticationMessage::AppKey);
        assert_eq!(decode_auth(auth::MAC_CODE, &[]), AuthenticationMessage::MacCode);
    }

    #[test]
    fn test_decode_unknown_auth_code_is_preserved() {
        assert_eq!(
            decode_auth(auth::KERBEROS_V5, &[]),
            AuthenticationMessage::Unsupported(2)
        );
        assert_eq!(decode_auth(99, &[]), AuthenticationMessage::Unsupported(99));
    }

    #[test]
    fn test_decode_error_response_fields() {
        let body = b"SFATAL\0C28000\0Mno pg_hba.conf entry\0\0";
        let mut frame = vec![b'E'];
        frame.extend_from_slice(&((4 + body.len()) as i32).to_be_bytes());
        frame.extend_from_slice(body);
        let mut data = BytesMut::from(&frame[..]);

        match decode_message(&mut data).unwrap().0 {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.severity.as_deref(), Some("FATAL"));
                assert_eq!(fields.code.as_deref(), Some("28000"));
                assert_eq!(fields.message.as_deref(), Some("no pg_hba.conf entry"));
            }
            other => panic!("expected ErrorResponse, got {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut data = BytesMut::from(&[b'?', 0, 0, 0, 4][..]);
        let err = decode_message(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
