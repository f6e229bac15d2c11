// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::str::FromStr;

use ethers::types::H256;
use serde::Deserialize;

/// A secp256k1 private key, never printed.
///
/// Read from config either as `0x`-prefixed hex or as `$ENV_VAR` holding it.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn parse_secret<E: serde::de::Error>(value: &str) -> Result<H256, E> {
    H256::from_str(value).map_err(|e| {
        E::custom(format!(
            "{e}\n expected a 66 chars string (including the 0x prefix) but found {} chars",
            value.len()
        ))
    })
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVisitor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    parse_secret(value)
                } else if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        E::custom(format!(
                            "error while loading this env {var}: {e}"
                        ))
                    })?;
                    parse_secret(&val)
                } else {
                    Err(E::custom(
                        "private key must be 0x-prefixed hex or $ENV_VAR",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVisitor)?;
        Ok(Self(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        key: PrivateKey,
    }

    #[test]
    fn reads_hex_and_env() {
        let hex = "0x8917174396171783496173419137618235192359106130478137647163400318";
        let h: Holder =
            serde_json::from_str(&format!(r#"{{"key":"{hex}"}}"#)).unwrap();
        assert_eq!(*h.key, H256::from_str(hex).unwrap());

        std::env::set_var("WATCHTOWER_TEST_PRIVATE_KEY", hex);
        let h: Holder =
            serde_json::from_str(r#"{"key":"$WATCHTOWER_TEST_PRIVATE_KEY"}"#)
                .unwrap();
        assert_eq!(*h.key, H256::from_str(hex).unwrap());
    }

    #[test]
    fn rejects_mnemonics() {
        let r: Result<Holder, _> =
            serde_json::from_str(r#"{"key":"word two three"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn debug_hides_the_key() {
        let key = PrivateKey::from(H256::repeat_byte(0x11));
        assert_eq!(format!("{key:?}"), "PrivateKey");
    }
}
