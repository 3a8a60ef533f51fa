//! Derived agent images.
//!
//! The in-environment strategy runs the agent inside the task container, so
//! it needs an image with the agent CLI and the harness binary layered on top
//! of the task's base image.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{Builder as TarBuilder, Header};
use tracing::info;

use super::environment::EnvironmentManager;
use super::runtime::ContainerRuntime;
use crate::error::ProvisionError;

/// Repository name for derived images.
pub const AGENT_IMAGE_REPO: &str = "setupbench-agent";

/// Path of the harness binary inside derived images.
pub const HARNESS_BINARY_PATH: &str = "/usr/local/bin/setupbench";

/// npm package providing the agent CLI.
pub const AGENT_CLI_PACKAGE: &str = "@anthropic-ai/claude-code";

/// Longest tag Docker accepts.
const MAX_TAG_LEN: usize = 128;

/// Hex digits of the base image digest appended to shortened tags.
const TAG_HASH_LEN: usize = 16;

/// Tag for the derived image of a base image.
///
/// `ubuntu:22.04` becomes `setupbench-agent:ubuntu-22.04`. Characters not
/// allowed in a tag become `-`. A tag that would be too long, or that has
/// nothing left after sanitising, is cut and suffixed with part of the
/// base image's SHA-256 so distinct bases keep distinct tags.
pub fn agent_image_tag(base_image: &str) -> String {
    let sanitized: String = base_image
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches(['.', '-']);

    let tag = if !sanitized.is_empty() && sanitized.len() <= MAX_TAG_LEN {
        sanitized.to_string()
    } else {
        let digest = hex::encode(Sha256::digest(base_image.as_bytes()));
        let hash = &digest[..TAG_HASH_LEN];
        let keep = sanitized.len().min(MAX_TAG_LEN - TAG_HASH_LEN - 1);
        if keep == 0 {
            hash.to_string()
        } else {
            format!("{}-{}", &sanitized[..keep], hash)
        }
    };

    format!("{AGENT_IMAGE_REPO}:{tag}")
}

/// Dockerfile for a derived image. The base comes in as the `BASE_IMAGE` build arg.
pub fn render_dockerfile() -> String {
    let mut lines = Vec::new();

    lines.push("ARG BASE_IMAGE".to_string());
    lines.push("FROM ${BASE_IMAGE}".to_string());
    lines.push(String::new());

    lines.push("USER root".to_string());
    lines.push(
        "RUN if command -v apt-get >/dev/null 2>&1; then \\\n      \
         apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends \
         bash curl ca-certificates nodejs npm && rm -rf /var/lib/apt/lists/*; \\\n    \
         elif command -v apk >/dev/null 2>&1; then \\\n      \
         apk add --no-cache bash curl ca-certificates nodejs npm; \\\n    \
         elif command -v yum >/dev/null 2>&1; then \\\n      \
         yum install -y bash curl ca-certificates nodejs npm && yum clean all; \\\n    \
         fi"
            .to_string(),
    );
    lines.push(format!("RUN npm install -g {}", AGENT_CLI_PACKAGE));
    lines.push(String::new());

    lines.push(format!("COPY setupbench {}", HARNESS_BINARY_PATH));
    lines.push(format!("RUN chmod 755 {}", HARNESS_BINARY_PATH));
    lines.push(String::new());

    lines.push(format!("WORKDIR {}", super::WORKSPACE_MOUNT));
    lines.push("CMD [\"/bin/bash\"]".to_string());

    lines.join("\n") + "\n"
}

/// Packs the Dockerfile and the harness binary into a gzip tar build context.
pub fn build_context(dockerfile: &str, harness_binary: &Path) -> std::io::Result<Vec<u8>> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = TarBuilder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, "Dockerfile", dockerfile.as_bytes())?;

    tar.append_path_with_name(harness_binary, "setupbench")?;

    let mut enc = tar.into_inner()?;
    enc.flush()?;
    enc.finish()
}

/// Returns the derived image tag for `base_image`, building it if needed.
///
/// A cached image is reused unless `force` is set.
pub async fn build_derived_image(
    runtime: &dyn ContainerRuntime,
    base_image: &str,
    harness_binary: &Path,
    force: bool,
) -> Result<String, ProvisionError> {
    let tag = agent_image_tag(base_image);

    if !force && runtime.image_exists(&tag).await? {
        info!(tag = %tag, "Derived image already exists");
        return Ok(tag);
    }

    info!(tag = %tag, base_image = %base_image, "Building derived image");
    let context = build_context(&render_dockerfile(), harness_binary).map_err(|e| {
        ProvisionError::ImageBuild {
            tag: tag.clone(),
            reason: format!("failed to pack build context: {e}"),
        }
    })?;

    let mut build_args = HashMap::new();
    build_args.insert("BASE_IMAGE".to_string(), base_image.to_string());

    runtime
        .build_image(&tag, context, build_args)
        .await
        .map_err(|e| ProvisionError::ImageBuild {
            tag: tag.clone(),
            reason: e.to_string(),
        })?;

    info!(tag = %tag, "Built derived image");
    Ok(tag)
}

impl EnvironmentManager {
    /// Builds (or reuses) the derived image for `base_image` with this
    /// process's own binary as the in-container harness.
    pub async fn build_derived_image(
        &self,
        base_image: &str,
        force: bool,
    ) -> Result<String, ProvisionError> {
        let binary = std::env::current_exe()?;
        build_derived_image(self.runtime().as_ref(), base_image, &binary, force).await
    }
}
