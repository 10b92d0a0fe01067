//! Batch-fetch mode: one `/init-batch-fetch` handshake followed by
//! repeated `/batch-fetch/{token}` tar-archive rounds (§4.G, §6).

use std::io::{Cursor, Read};

use nixcache_core::error::{Error, Result};
use nixcache_core::nix_store::StorePath;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::FetchReport;
use crate::compression;
use crate::engine::Engine;

#[derive(Debug, Deserialize)]
struct InitBatchFetchResponse {
    token: String,
    #[allow(dead_code)]
    num_total_paths: u64,
}

/// One member's metadata as carried in a round's `info.json`.
#[derive(Debug, Deserialize)]
struct BatchNarMapping {
    store_path: String,
    compression: String,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    deriver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchInfo {
    import_ordering: Vec<String>,
    nar_mapping: std::collections::HashMap<String, BatchNarMapping>,
    paths_remaining: u64,
}

pub async fn fetch_batch(engine: &Engine, paths: &[StorePath]) -> Result<FetchReport> {
    let body = serde_json::json!({
        "paths": paths
            .iter()
            .map(|p| engine.store.get_full_path(p).to_string_lossy().into_owned())
            .collect::<Vec<_>>(),
    });
    let response = engine
        .session
        .request(
            Method::POST,
            "init-batch-fetch",
            Some(reqwest::Body::from(serde_json::to_vec(&body).expect("json"))),
        )
        .await?;

    if response.status().is_client_error() {
        return Err(Error::OperationNotSupported {
            route: "init-batch-fetch",
        });
    }
    if !response.status().is_success() {
        return Err(Error::CouldNotConnect {
            endpoint: engine.session.endpoint().to_string(),
            reason: format!("init-batch-fetch failed with {}", response.status()),
        });
    }

    let init: InitBatchFetchResponse = response.json().await.map_err(|e| Error::CouldNotConnect {
        endpoint: engine.session.endpoint().to_string(),
        reason: e.to_string(),
    })?;

    let mut fetched = Vec::new();

    loop {
        engine.cancellation.check()?;

        let route = format!("batch-fetch/{}", init.token);
        let response = engine.session.request(Method::GET, &route, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::OperationNotSupported { route: "batch-fetch" });
        }
        if !response.status().is_success() {
            return Err(Error::CouldNotConnect {
                endpoint: engine.session.endpoint().to_string(),
                reason: format!("batch-fetch failed with {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::CouldNotConnect {
                endpoint: engine.session.endpoint().to_string(),
                reason: e.to_string(),
            })?;

        let paths_remaining = import_round(engine, &bytes, &mut fetched).await?;
        if paths_remaining == 0 {
            break;
        }
    }

    Ok(FetchReport { fetched })
}

/// Splits one round's tar bytes into its `info.json` and NAR members.
/// Pure and side-effect-free so it can be tested without a live `Engine`.
fn parse_round(tar_bytes: &[u8]) -> Result<(BatchInfo, std::collections::HashMap<String, Vec<u8>>)> {
    let mut archive = tar::Archive::new(Cursor::new(tar_bytes));
    let mut info: Option<BatchInfo> = None;
    let mut members: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();

    for entry in archive.entries().map_err(|e| Error::MalformedManifest {
        reason: format!("invalid batch-fetch tar stream: {e}"),
    })? {
        let mut entry = entry.map_err(|e| Error::MalformedManifest {
            reason: format!("invalid batch-fetch tar entry: {e}"),
        })?;
        let name = entry
            .path()
            .map_err(|e| Error::MalformedManifest {
                reason: format!("invalid tar entry path: {e}"),
            })?
            .to_string_lossy()
            .into_owned();

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;

        if name == "info.json" {
            info = Some(serde_json::from_slice(&buf).map_err(|e| Error::MalformedManifest {
                reason: format!("invalid info.json in batch-fetch round: {e}"),
            })?);
        } else {
            members.insert(name, buf);
        }
    }

    let info = info.ok_or_else(|| Error::MalformedManifest {
        reason: "batch-fetch round missing info.json".to_string(),
    })?;

    Ok((info, members))
}

async fn import_round(engine: &Engine, tar_bytes: &[u8], fetched: &mut Vec<StorePath>) -> Result<u64> {
    let (info, members) = parse_round(tar_bytes)?;

    for member_name in &info.import_ordering {
        engine.cancellation.check()?;

        let mapping = info.nar_mapping.get(member_name).ok_or_else(|| Error::MalformedManifest {
            reason: format!("batch-fetch round missing nar_mapping for {member_name}"),
        })?;
        let compressed = members.get(member_name).ok_or_else(|| Error::MalformedManifest {
            reason: format!("batch-fetch round missing member {member_name}"),
        })?;

        // `store_path`/`references`/`deriver` are base names, matching the
        // rest of this crate's `StorePath` convention.
        let path = StorePath::from_base_name(std::path::PathBuf::from(mapping.store_path.clone()))?;
        let codec = nixcache_core::narinfo::Compression::parse(&mapping.compression)?;

        let mut reader = compression::decompress(&compressed[..], codec);
        let mut nar_bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut nar_bytes).await?;

        let references: Result<Vec<StorePath>> = mapping
            .references
            .iter()
            .map(|r| StorePath::from_base_name(std::path::PathBuf::from(r.clone())))
            .collect();
        let references = references?;
        let deriver = mapping
            .deriver
            .as_ref()
            .map(|d| StorePath::from_base_name(std::path::PathBuf::from(d.clone())))
            .transpose()?;

        let mut export = Vec::new();
        nixcache_core::export::write_export(
            &mut export,
            &engine.store.store_dir().to_string_lossy(),
            &nar_bytes,
            &path,
            &references,
            deriver.as_ref(),
        )?;

        engine.store.import(&export).await?;
        engine.reference_cache.record(&path, &references).await?;
        fetched.push(path);
    }

    Ok(info.paths_remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds one round's tar bytes: an `info.json` entry plus one raw
    /// member per `(name, bytes)` pair, matching the wire shape
    /// `/batch-fetch/{token}` responses use.
    fn build_round_tar(info_json: &[u8], members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut header = tar::Header::new_gnu();
        header.set_size(info_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "info.json", info_json).unwrap();

        for (name, bytes) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, *name, *bytes).unwrap();
        }

        builder.into_inner().unwrap()
    }

    #[test]
    fn parses_first_round_of_two() {
        let info_json = br#"{
            "import_ordering": ["n1", "n2"],
            "nar_mapping": {
                "n1": {"store_path": "00000000000000000000000000000001-a", "compression": "none", "references": []},
                "n2": {"store_path": "00000000000000000000000000000002-b", "compression": "none", "references": ["00000000000000000000000000000001-a"]}
            },
            "paths_remaining": 1
        }"#;
        let tar_bytes = build_round_tar(info_json, &[("n1", b"nar-bytes-1"), ("n2", b"nar-bytes-2")]);

        let (info, members) = parse_round(&tar_bytes).unwrap();
        assert_eq!(info.import_ordering, vec!["n1", "n2"]);
        assert_eq!(info.paths_remaining, 1);
        assert_eq!(members.get("n1").unwrap(), b"nar-bytes-1");
        assert_eq!(members.get("n2").unwrap(), b"nar-bytes-2");
        assert_eq!(
            info.nar_mapping.get("n2").unwrap().references,
            vec!["00000000000000000000000000000001-a".to_string()]
        );
    }

    #[test]
    fn parses_final_round_with_zero_remaining() {
        let info_json = br#"{
            "import_ordering": ["n3"],
            "nar_mapping": {
                "n3": {"store_path": "00000000000000000000000000000003-c", "compression": "none", "references": []}
            },
            "paths_remaining": 0
        }"#;
        let tar_bytes = build_round_tar(info_json, &[("n3", b"nar-bytes-3")]);

        let (info, members) = parse_round(&tar_bytes).unwrap();
        assert_eq!(info.paths_remaining, 0);
        assert_eq!(info.import_ordering, vec!["n3"]);
        assert!(members.contains_key("n3"));
    }

    #[test]
    fn missing_info_json_is_malformed_manifest() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        let bytes = b"orphan";
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "n1", &bytes[..]).unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let err = parse_round(&tar_bytes).unwrap_err();
        assert!(matches!(err, Error::MalformedManifest { .. }));
    }

    #[test]
    fn malformed_info_json_is_rejected() {
        let tar_bytes = build_round_tar(b"not json", &[]);
        let err = parse_round(&tar_bytes).unwrap_err();
        assert!(matches!(err, Error::MalformedManifest { .. }));
    }
}
