//! OSC アドレスパターン
//!
//! `*` はセグメント内の任意の文字列、`?` は 1 文字にマッチする。
//! `**` だけのセグメントは 0 個以上のセグメント全体にマッチする。

use std::cmp::Reverse;
use std::fmt;

use crate::error::TransportError;

const ANY_DEPTH: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    raw: String,
    segments: Vec<String>,
    literal_chars: usize,
    wildcards: usize,
}

impl AddressPattern {
    pub fn parse(pattern: &str) -> Result<Self, TransportError> {
        if !pattern.starts_with('/') {
            return Err(TransportError::InvalidAddress(pattern.to_string()));
        }
        let segments: Vec<String> = pattern[1..].split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) && pattern != "/" {
            return Err(TransportError::InvalidAddress(pattern.to_string()));
        }

        let wildcards = pattern.chars().filter(|c| matches!(c, '*' | '?')).count();
        let literal_chars = pattern.chars().count() - wildcards;
        Ok(Self {
            raw: pattern.to_string(),
            segments,
            literal_chars,
            wildcards,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_literal(&self) -> bool {
        self.wildcards == 0
    }

    /// ソートキー: リテラル文字が多いほど先、次にワイルドカードが少ないほど先
    pub fn specificity(&self) -> (Reverse<usize>, usize) {
        (Reverse(self.literal_chars), self.wildcards)
    }

    pub fn matches(&self, address: &str) -> bool {
        let Some(rest) = address.strip_prefix('/') else {
            return false;
        };
        if self.is_literal() {
            return self.raw == address;
        }
        let parts: Vec<&str> = rest.split('/').collect();
        let pats: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pats, &parts)
    }
}

impl fmt::Display for AddressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn match_segments(pats: &[&str], parts: &[&str]) -> bool {
    match pats.split_first() {
        None => parts.is_empty(),
        Some((&ANY_DEPTH, rest)) => (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..])),
        Some((pat, rest)) => match parts.split_first() {
            Some((part, tail)) => glob(pat.as_bytes(), part.as_bytes()) && match_segments(rest, tail),
            None => false,
        },
    }
}

// 直近の * だけに戻る反復 glob
fn glob(pat: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pat.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pat[p..].iter().all(|c| *c == b'*')
}
