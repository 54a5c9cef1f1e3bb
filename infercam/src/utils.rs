//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

use crate::config::ModelSource;

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Local path of a model, downloading it into the cache directory if needed.
pub async fn resolve_model_source(source: &ModelSource) -> Result<PathBuf> {
    match source {
        ModelSource::Path(path) => {
            if !path.exists() {
                bail!("model file {} not found", path.display());
            }
            Ok(path.clone())
        }
        ModelSource::Url(url) => {
            let cache_dir = dirs::cache_dir()
                .context("no cache directory available")?
                .join("infercam");
            std::fs::create_dir_all(&cache_dir)?;

            let filepath = cache_dir.join(cached_file_name(url)?);
            if filepath.exists() {
                log::info!("Using cached model {}", filepath.display());
                return Ok(filepath);
            }

            log::info!("Downloading model from {url}");
            // Download next to the target so an interrupted download is never reused
            let partial = filepath.with_extension("part");
            download_file(&Client::new(), url, &partial)
                .await
                .with_context(|| format!("failed to download model from {url}"))?;
            std::fs::rename(&partial, &filepath)?;

            Ok(filepath)
        }
    }
}

fn cached_file_name(url: &str) -> Result<String> {
    let name = url
        .split(|c: char| c == '?' || c == '#')
        .next()
        .and_then(|url| url.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .with_context(|| format!("no file name in model URL {url}"))?;
    Ok(name.to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cached_file_name() {
        assert_eq!(
            cached_file_name("https://example.org/models/yolov8n.onnx?raw=true").unwrap(),
            "yolov8n.onnx"
        );
        assert!(cached_file_name("https://example.org/models/").is_err());
    }

    #[tokio::test]
    async fn test_missing_local_model() {
        let source = ModelSource::Path("does/not/exist.onnx".into());
        assert!(resolve_model_source(&source).await.is_err());
    }
}
