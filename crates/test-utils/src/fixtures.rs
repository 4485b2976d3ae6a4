//! Deterministic fixtures.

use alloy_primitives::{Address, B256, b256};
use alloy_signer_local::PrivateKeySigner;
use slabd_api::Deal;
use slabd_primitives::DealId;

/// The 22-byte file used by the plain-mode scenarios.
pub const HELLO: &[u8] = b"Hello World from Slab\n";

/// Path the hello file is stored under.
pub const HELLO_PATH: &str = "hello.txt";

/// Service parameters selecting an 8+4 erasure layout.
pub const RS_8_4: &str = "General;rs=8+4";

const OWNER_KEY: B256 = b256!("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318");
const STRANGER_KEY: B256 =
    b256!("8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f");

/// Signer of the deal owner.
#[allow(clippy::expect_used)]
pub fn owner_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&OWNER_KEY).expect("fixture key is a valid scalar")
}

/// Signer that owns nothing.
#[allow(clippy::expect_used)]
pub fn stranger_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&STRANGER_KEY).expect("fixture key is a valid scalar")
}

/// Address of provider `i`.
pub fn provider_address(i: usize) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x5b;
    bytes[12..].copy_from_slice(&(i as u64).to_be_bytes());
    Address::from(bytes)
}

/// A deal owned by [`owner_signer`] with no content root yet.
pub fn deal(id: u64, service_params: &str, providers: Vec<Address>) -> Deal {
    Deal {
        id: DealId(id),
        owner: owner_signer().address(),
        content_root: None,
        service_params: service_params.to_owned(),
        providers,
    }
}

/// `len` bytes of a repeating, non-trivial pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}
