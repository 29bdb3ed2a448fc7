#![no_main]

use herodb_wire::auth::{select_mechanism, ChannelBindingMode, ScramClient};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct ScramInput {
    password: String,
    offered: Vec<String>,
    binding: Option<Vec<u8>>,
    server_first: String,
    server_final: String,
}

impl<'a> Arbitrary<'a> for ScramInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            password: u.arbitrary()?,
            offered: u.arbitrary()?,
            binding: u.arbitrary()?,
            server_first: u.arbitrary()?,
            server_final: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ScramInput| {
    let Ok((algorithm, binding)) =
        select_mechanism(&input.offered, input.binding, ChannelBindingMode::Prefer)
    else {
        return;
    };

    let mut client = ScramClient::with_algorithm(
        "*".to_string(),
        input.password,
        std::sync::Arc::new(algorithm),
        binding,
    );
    let _first = client.client_first();

    if let Ok((_, state)) = client.client_final(&input.server_first) {
        let _ = client.verify_server_final(&input.server_final, &state);
    }
});
