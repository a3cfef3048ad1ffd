use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::core::ObjectMeta;
use rand::Rng;

use crate::resources::common::cluster_labels;

/// Key holding the role's user name
pub const USERNAME_KEY: &str = "username";

/// Key holding the role's password
pub const PASSWORD_KEY: &str = "password";

/// Generate a random alphanumeric password
pub fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Build the secret holding one credential role's user name and password
pub fn build_credential_secret(
    cluster_name: &str,
    secret_name: &str,
    username: &str,
    password: &str,
) -> Secret {
    let string_data = BTreeMap::from([
        (USERNAME_KEY.to_string(), username.to_string()),
        (PASSWORD_KEY.to_string(), password.to_string()),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            labels: Some(cluster_labels(cluster_name)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Read a value from a secret, preferring the decoded `data` the API server
/// returns over write-only `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
        })
        .filter(|v| !v.is_empty())
}
