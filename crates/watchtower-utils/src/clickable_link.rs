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

use std::fmt;

/// Text that renders as a hyperlink in terminals supporting OSC 8.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ClickableLink<'a> {
    text: &'a str,
    url: &'a str,
}

impl<'a> ClickableLink<'a> {
    /// Links `text` to `url`.
    pub fn new(text: &'a str, url: &'a str) -> Self {
        Self { text, url }
    }
}

impl fmt::Display for ClickableLink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\u{1b}]8;;{}\u{1b}\\{}\u{1b}]8;;\u{1b}\\",
            self.url, self.text
        )
    }
}

/// Formats `tx_hash` for logs, as an explorer link when an explorer is known.
pub fn tx_link(explorer: Option<&url::Url>, tx_hash: ethers::types::H256) -> String {
    let tx_hash_string = format!("0x{tx_hash:x}");
    match explorer {
        Some(explorer) => {
            let mut url = explorer.clone();
            url.set_path(&format!("tx/{tx_hash_string}"));
            ClickableLink::new(&tx_hash_string, url.as_str()).to_string()
        }
        None => tx_hash_string,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_hash_without_explorer() {
        let link = tx_link(None, ethers::types::H256::repeat_byte(0xab));
        assert!(link.starts_with("0xabab"));
        assert_eq!(link.len(), 66);
    }

    #[test]
    fn explorer_link_points_to_tx_path() {
        let explorer = url::Url::parse("https://explorer.example").unwrap();
        let link = tx_link(Some(&explorer), ethers::types::H256::zero());
        assert!(link.contains("https://explorer.example/tx/0x000"));
    }
}
