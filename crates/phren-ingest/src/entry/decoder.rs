//! Raw entry → [`LogEntry`]
//!
//! The entry body is a base64 JSON document whose `kind` and `apiVersion`
//! together select the shape of `spec`. Each supported pair has its own
//! parse function producing a [`Payload`]; identity extraction then runs on
//! the embedded key and is allowed to fail without failing the entry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::DateTime;
use serde::Deserialize;
use tracing::{debug, warn};

use super::identity::{extract_identity, Identity, FORMAT_X509};
use super::model::{ContentHash, EntryKind, LogEntry, Signature};
use crate::error::DecodeError;
use crate::tlog::RawEntry;

#[derive(Deserialize)]
struct KindHeader {
    kind: String,
    #[serde(default, rename = "apiVersion")]
    api_version: Option<String>,
}

#[derive(Deserialize)]
struct HashSpec {
    algorithm: String,
    value: String,
}

#[derive(Deserialize)]
struct DataSpec {
    hash: HashSpec,
}

#[derive(Deserialize)]
struct KeyContent {
    content: String,
}

#[derive(Deserialize)]
struct RekordBody {
    spec: RekordSpec,
}

#[derive(Deserialize)]
struct RekordSpec {
    data: DataSpec,
    signature: RekordSignature,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RekordSignature {
    #[serde(default)]
    format: String,
    public_key: KeyContent,
}

#[derive(Deserialize)]
struct HashedRekordBody {
    spec: HashedRekordSpec,
}

#[derive(Deserialize)]
struct HashedRekordSpec {
    data: DataSpec,
    signature: HashedRekordSignature,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashedRekordSignature {
    public_key: KeyContent,
}

#[derive(Deserialize)]
struct InTotoBody {
    spec: InTotoSpec,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InTotoSpec {
    content: InTotoContent,
    public_key: String,
}

#[derive(Deserialize)]
struct InTotoContent {
    hash: HashSpec,
}

#[derive(Deserialize)]
struct InTotoV2Body {
    spec: InTotoV2Spec,
}

#[derive(Deserialize)]
struct InTotoV2Spec {
    content: InTotoV2Content,
}

#[derive(Deserialize)]
struct InTotoV2Content {
    envelope: Envelope,
    hash: HashSpec,
}

/// DSSE envelope as stored by the log; the payload itself is stripped
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    signatures: Vec<EnvelopeSignature>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSignature {
    public_key: String,
}

/// The kind-specific part of an entry
struct Payload {
    hash: HashSpec,
    format: String,
    public_key: String,
}

fn parse_json<'a, T: Deserialize<'a>>(
    body: &'a [u8],
    context: &'static str,
) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|source| DecodeError::Json { context, source })
}

fn parse_rekord(body: &[u8]) -> Result<Payload, DecodeError> {
    let RekordBody { spec } = parse_json(body, "rekord body")?;
    Ok(Payload {
        hash: spec.data.hash,
        format: spec.signature.format,
        public_key: spec.signature.public_key.content,
    })
}

fn parse_hashed_rekord(body: &[u8]) -> Result<Payload, DecodeError> {
    let HashedRekordBody { spec } = parse_json(body, "hashedrekord body")?;
    Ok(Payload {
        hash: spec.data.hash,
        format: FORMAT_X509.to_string(),
        public_key: spec.signature.public_key.content,
    })
}

fn parse_intoto(body: &[u8]) -> Result<Payload, DecodeError> {
    let InTotoBody { spec } = parse_json(body, "intoto body")?;
    Ok(Payload {
        hash: spec.content.hash,
        format: FORMAT_X509.to_string(),
        public_key: spec.public_key,
    })
}

/// Signer identity comes from the first envelope signature
fn parse_intoto_v2(body: &[u8]) -> Result<Payload, DecodeError> {
    let InTotoV2Body { spec } = parse_json(body, "intoto 0.0.2 body")?;
    let InTotoV2Content { envelope, hash } = spec.content;
    let signature = envelope
        .signatures
        .into_iter()
        .next()
        .ok_or(DecodeError::MissingField("spec.content.envelope.signatures"))?;
    Ok(Payload {
        hash,
        format: FORMAT_X509.to_string(),
        public_key: signature.public_key,
    })
}

type ParseFn = fn(&[u8]) -> Result<Payload, DecodeError>;

/// Parser for a `(kind, apiVersion)` pair; `None` for anything not understood
fn parser_for(kind: EntryKind, api_version: Option<&str>) -> Option<ParseFn> {
    match (kind, api_version?) {
        (EntryKind::Rekord, "0.0.1") => Some(parse_rekord),
        (EntryKind::HashedRekord, "0.0.1") => Some(parse_hashed_rekord),
        (EntryKind::InToto, "0.0.1") => Some(parse_intoto),
        (EntryKind::InToto, "0.0.2") => Some(parse_intoto_v2),
        _ => None,
    }
}

/// Decode the entry fetched for `index`
///
/// Unknown kinds, and known kinds at an unknown `apiVersion`, yield an
/// `Unsupported` record, not an error. A key that does not produce an
/// identity yields `Identity::None`.
pub fn decode_entry(index: u64, raw: &RawEntry) -> Result<LogEntry, DecodeError> {
    if raw.log_index != index {
        return Err(DecodeError::IndexMismatch {
            expected: index,
            actual: raw.log_index,
        });
    }

    let integrated_time = DateTime::from_timestamp(raw.integrated_time, 0)
        .ok_or(DecodeError::Timestamp(raw.integrated_time))?;

    let body = STANDARD
        .decode(raw.body.as_bytes())
        .map_err(|source| DecodeError::Base64 {
            field: "body",
            source,
        })?;

    let header: KindHeader = parse_json(&body, "entry kind")?;
    let kind = EntryKind::from_tag(&header.kind);

    let Some(parse) = parser_for(kind, header.api_version.as_deref()) else {
        debug!(
            index,
            kind = %header.kind,
            api_version = header.api_version.as_deref().unwrap_or("-"),
            "Unsupported entry kind"
        );
        return Ok(LogEntry::unsupported(
            raw.log_index,
            integrated_time,
            raw.log_id.clone(),
        ));
    };

    let payload = parse(&body)?;
    let key_bytes = STANDARD
        .decode(payload.public_key.as_bytes())
        .map_err(|source| DecodeError::Base64 {
            field: "public key",
            source,
        })?;

    let identity = match extract_identity(&key_bytes, &payload.format) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(index, %kind, format = %payload.format, error = %e, "Could not extract signer identity");
            Identity::None
        },
    };

    Ok(LogEntry {
        log_index: raw.log_index,
        integrated_time,
        log_id: raw.log_id.clone(),
        kind,
        api_version: header.api_version,
        hash: Some(ContentHash {
            algorithm: payload.hash.algorithm,
            value: payload.hash.value,
        }),
        signature: Some(Signature {
            format: payload.format,
            public_key: payload.public_key,
            identity,
        }),
    })
}
