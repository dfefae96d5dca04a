//! Random opaque tokens

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// 32 random bytes, base64url without padding
///
/// Used for user bearer tokens and the login CSRF state.
pub(crate) fn random_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
