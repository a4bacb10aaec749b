//! `fetch`: retrieve one tile over HTTP and describe it.

use std::path::PathBuf;

use clap::Args;
use globetile::config::ConfigFile;
use globetile::globe::ElevationFormat;
use globetile::retrieval::{HttpRetriever, RetrievalRequest, RetrievedData, Retriever};
use globetile::tile::TileKey;
use globetile::RetrievalError;

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Tile URL
    pub url: String,

    /// Write the payload to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Request timeout in seconds (defaults to the configured timeout)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Accepted content type; repeat for several, `image/*` matches any image
    #[arg(long = "accept", value_name = "MIME")]
    pub accepted_content_types: Vec<String>,
}

/// Human-readable summary of a payload.
pub fn describe(data: &RetrievedData) -> String {
    let content_type = data.content_type.as_deref().unwrap_or("unknown");
    let mut summary = format!("{} bytes, {}", data.bytes.len(), content_type);

    if content_type.starts_with("image/") {
        match image::load_from_memory(&data.bytes) {
            Ok(image) => summary.push_str(&format!(", {}x{} pixels", image.width(), image.height())),
            Err(e) => summary.push_str(&format!(", undecodable: {}", e)),
        }
    } else if let Ok(format) = ElevationFormat::parse(content_type) {
        let samples = data.bytes.len() / format.bytes_per_sample();
        summary.push_str(&format!(", {} elevation samples", samples));
    }
    summary
}

pub fn run(args: FetchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Startup(format!("Failed to start async runtime: {}", e)))?;

    let retriever =
        HttpRetriever::with_timeout(args.timeout.unwrap_or(config.retrieval.timeout_secs))?;
    let request = RetrievalRequest {
        tile_key: TileKey::new(0, 0, 0),
        url: args.url.clone(),
        accepted_content_types: args.accepted_content_types.clone(),
    };
    let data = runtime.block_on(retriever.retrieve(request.clone()))?;

    if !request.accepts(data.content_type.as_deref()) {
        return Err(RetrievalError::UnexpectedContentType {
            content_type: data.content_type.clone().unwrap_or_default(),
            url: args.url,
        }
        .into());
    }

    println!("{}", describe(&data));
    if let Some(path) = args.output {
        std::fs::write(&path, &data.bytes)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_describe_elevation_payload() {
        let data = RetrievedData {
            content_type: Some("application/bil16".to_string()),
            bytes: Bytes::from(vec![0u8; 512]),
        };
        assert_eq!(describe(&data), "512 bytes, application/bil16, 256 elevation samples");
    }

    #[test]
    fn test_describe_undecodable_image() {
        let data = RetrievedData {
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(b"not a png"),
        };
        assert!(describe(&data).contains("undecodable"));
    }

    #[test]
    fn test_describe_unknown_content_type() {
        let data = RetrievedData {
            content_type: None,
            bytes: Bytes::from_static(b"abc"),
        };
        assert_eq!(describe(&data), "3 bytes, unknown");
    }
}
