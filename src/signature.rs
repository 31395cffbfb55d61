//! Request signing with the account secret key.

use crate::types::{HttpMethod, Query};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a request.
///
/// The signed string joins, one per line:
///
/// ```text
/// {subscribe_key}
/// {publish_key}
/// {METHOD}
/// {path}
/// {sorted encoded query}
/// ```
///
/// For methods other than GET with a non-empty body, a newline and the body
/// follow. There is no trailing newline. The digest is base64 with the
/// URL-unsafe characters swapped and a `v2.` prefix.
pub fn sign(
    secret_key: &str,
    subscribe_key: &str,
    publish_key: &str,
    method: HttpMethod,
    path: &str,
    query: &Query,
    body: &[u8],
) -> String {
    let mut message = format!(
        "{}\n{}\n{}\n{}\n{}",
        subscribe_key,
        publish_key,
        method.as_str(),
        path,
        query.encode_sorted()
    );
    if method != HttpMethod::Get && !body.is_empty() {
        message.push('\n');
        message.push_str(&String::from_utf8_lossy(body));
    }

    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    let digest = STANDARD.encode(mac.finalize().into_bytes());

    let digest = digest.replace('+', "-").replace('/', "_");
    format!("v2.{}", digest.trim_end_matches('='))
}
