#![no_main]

use bytes::BytesMut;
use herodb_wire::auth::SignedChallenge;
use herodb_wire::protocol::{decode_message, AuthenticationMessage, BackendMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // several frames may share one read
    while !buf.is_empty() {
        let (msg, consumed) = match decode_message(&mut buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                // a whole frame must never be reported as incomplete
                if buf.len() >= 5 {
                    let declared = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                    if declared >= 4 && buf.len() > declared as usize {
                        assert_ne!(e.kind(), std::io::ErrorKind::UnexpectedEof);
                    }
                }
                break;
            }
        };
        if consumed == 0 {
            break;
        }
        let _ = buf.split_to(consumed);

        if let BackendMessage::Authentication(AuthenticationMessage::Challenge { data }) = msg {
            let _ = SignedChallenge::parse(&data);
        }
    }
});
