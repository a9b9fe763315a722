//! Wire obfuscation: subject pairs, Message-IDs, headers, and share ids.
//!
//! Every segment carries two subjects. The internal subject is deterministic
//! (derived from folder id, file version, segment index, and the folder
//! signing key) and exists only for local verification; it is never posted.
//! The wire subject is 20 characters of CSPRNG output with no derivation
//! from internal data. Nothing posted to the relay may correlate with
//! content, identity, or ordering beyond the unavoidable article size.

use std::sync::OnceLock;

use data_encoding::{Encoding, Specification};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::crypto::hmac_sha256;
use crate::relay::ArticleHeaders;

/// Newsreaders commonly seen posting binaries; articles blend in with them.
const USER_AGENTS: &[&str] = &[
    "Mozilla Thunderbird",
    "Pan/0.146",
    "slrn/1.0.3",
    "Xnews/5.04.25",
    "Forte Agent 8.0",
    "MesNews/1.08.06.00",
    "Gnus/5.13",
    "tin/2.4.5",
    "ngPost/4.14",
];

/// Domain pool for Message-IDs.
const DOMAINS: &[&str] = &[
    "ngPost.com",
    "news.local",
    "usenet.local",
    "posting.local",
    "nntp.local",
];

const ORGANIZATIONS: &[Option<&str>] = &[None, Some("Private"), Some("Personal"), Some("Home")];

/// Base32 alphabet for share ids: no 0/O/1/I.
const SHARE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a share id in characters (24 base32 chars = 15 random bytes).
pub const SHARE_ID_LEN: usize = 24;

/// Base32 codec over the confusion-free alphabet.
pub fn share_encoding() -> &'static Encoding {
    static ENC: OnceLock<Encoding> = OnceLock::new();
    ENC.get_or_init(|| {
        let mut spec = Specification::new();
        spec.symbols.push_str(SHARE_ALPHABET);
        spec.encoding().expect("share alphabet is a valid base32 set")
    })
}

/// Two-layer subject system for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPair {
    /// 64 hex chars used only for verification; never posted.
    pub internal: String,
    /// 20 random alphanumerics; the only subject the relay ever sees.
    pub wire: String,
}

/// Build the subject pair for one segment.
///
/// The internal subject is an HMAC under the folder signing key, so only the
/// key holder can recompute it; the wire subject is independent randomness.
pub fn subject_pair(
    folder_id: &str,
    file_version: i64,
    segment_index: u32,
    signing_key: &[u8; 32],
) -> SubjectPair {
    let msg = format!("{folder_id}:{file_version}:{segment_index}");
    let internal = hex::encode(hmac_sha256(signing_key, msg.as_bytes()));
    SubjectPair {
        internal,
        wire: wire_subject(),
    }
}

/// Check an internal subject against the values it should derive from.
pub fn verify_internal_subject(
    internal: &str,
    folder_id: &str,
    file_version: i64,
    segment_index: u32,
    signing_key: &[u8; 32],
) -> bool {
    let msg = format!("{folder_id}:{file_version}:{segment_index}");
    internal == hex::encode(hmac_sha256(signing_key, msg.as_bytes()))
}

/// 20 random alphanumerics from the OS CSPRNG.
pub fn wire_subject() -> String {
    (&mut OsRng)
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// Random Message-ID: `<16 lowercase alphanumerics>@<pool domain>`.
/// No timestamps, no host names, no sequence numbers.
pub fn message_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let local: String = (0..16)
        .map(|_| {
            let i = OsRng.gen_range(0..CHARSET.len());
            CHARSET[i] as char
        })
        .collect();
    let domain = DOMAINS.choose(&mut OsRng).expect("domain pool is non-empty");
    format!("<{local}@{domain}>")
}

/// Random 24-character share id over the confusion-free base32 alphabet.
pub fn share_id() -> String {
    use rand::RngCore;
    let mut raw = [0u8; 15];
    OsRng.fill_bytes(&mut raw);
    share_encoding().encode(&raw)
}

/// True if `s` is a well-formed share id.
pub fn is_share_id(s: &str) -> bool {
    s.len() == SHARE_ID_LEN && s.chars().all(|c| SHARE_ALPHABET.contains(c))
}

/// Replace a filename with a random 12-character name, keeping the extension.
pub fn obfuscate_filename(filename: &str) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let name: String = (0..12)
        .map(|_| {
            let i = OsRng.gen_range(0..CHARSET.len());
            CHARSET[i] as char
        })
        .collect();
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => format!("{name}.{ext}"),
        _ => name,
    }
}

/// Full header set for one article post. Every field is drawn fresh; the
/// `From` local part and the Path are randomized to look like ordinary
/// not-for-mail traffic.
pub fn article_headers(message_id: String, subject: String, newsgroups: &[String]) -> ArticleHeaders {
    let user_agent = USER_AGENTS
        .choose(&mut OsRng)
        .expect("user agent pool is non-empty")
        .to_string();
    let organization = ORGANIZATIONS
        .choose(&mut OsRng)
        .copied()
        .flatten()
        .map(str::to_string);
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let from_local: String = (0..8)
        .map(|_| {
            let i = OsRng.gen_range(0..CHARSET.len());
            CHARSET[i] as char
        })
        .collect();
    let date = OffsetDateTime::now_utc()
        .format(&Rfc2822)
        .unwrap_or_else(|_| "Thu, 01 Jan 1970 00:00:00 +0000".to_string());

    ArticleHeaders {
        message_id,
        subject,
        newsgroups: newsgroups.join(","),
        from: format!("{from_local}@example.invalid"),
        date,
        path: "not-for-mail".to_string(),
        user_agent,
        organization,
    }
}
