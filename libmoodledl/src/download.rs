use crate::classify::{Resource, ResourceKind, ResourceMap};
use crate::errors::MdlError;
use crate::{Message, Progress, RunContext, Update};
use reqwest::header;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

/// Name of the per-course file listing the course's external links.
pub const EXTERNAL_LINKS_FILE_NAME: &str = "Externe Links.html";

const RESERVED_CHARACTERS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Makes a server-provided name safe to use as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_CHARACTERS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Directory name for a course: spaces become hyphens.
pub fn course_dir_name(display_name: &str) -> String {
    sanitize_file_name(&display_name.replace(' ', "-"))
}

/// One anchor line per external link, in discovery order.
pub fn external_links_fragment(resources: &ResourceMap) -> String {
    resources
        .iter()
        .filter(|r| r.kind == ResourceKind::ExternalLink)
        .map(|r| {
            let link = r.source_location.as_str();
            format!("<a href=\"{link}\">{link}</a><br />\n")
        })
        .collect()
}

/// In-flight progress only makes sense against a known total size.
fn progress_due(f_size: u64, since_last_update: Duration, interval: Duration) -> bool {
    f_size > 0 && since_last_update > interval
}

/// Downloads a resource into `destination_dir` using the session cookies.
/// External links are not downloaded and yield `Ok(None)`. An existing file
/// is never overwritten. The returned path is the written file.
#[tracing::instrument(skip(ctx))]
pub async fn download_resource(
    ctx: &RunContext,
    destination_dir: &Path,
    resource: &Resource,
) -> Result<Option<PathBuf>, MdlError> {
    if resource.kind == ResourceKind::ExternalLink {
        tracing::debug!("Not downloading external link {}", resource.source_location);
        return Ok(None);
    }

    let link = &resource.source_location;
    let mut request = ctx.client.get(link.clone());
    if !ctx.session.is_empty() {
        request = request.header(header::COOKIE, ctx.session.cookie_header());
    }

    let mut response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Error downloading file from {}", link);
            tracing::error!("{}", e);
            return Err(MdlError::Download {
                url: link.to_string(),
                message: e.to_string(),
            });
        }
    };
    if !response.status().is_success() {
        tracing::error!("Error status code received : {} |{}|", response.status(), link);
        return Err(MdlError::Download {
            url: link.to_string(),
            message: format!("server returned {}", response.status()),
        });
    }

    let f_name = sanitize_file_name(&resource.display_name);
    let dest_path = destination_dir.join(&f_name);

    let mut dest_file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest_path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Error creating file {}", dest_path.display());
            tracing::error!("{} | {}", e, e.kind());
            return Err(MdlError::Download {
                url: link.to_string(),
                message: format!("{} | {} : {}", e, e.kind(), dest_path.display()),
            });
        }
    };

    let f_size = response.content_length().unwrap_or(0);
    let progress_update_interval = Duration::from_millis(ctx.rule.progress_update_interval);
    let mut last_update_time = Instant::now();
    let mut bytes_written: u64 = 0;

    // A failure from here on leaves the partial file behind.
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error downloading resource from {}", link);
                tracing::error!("{}", e);
                return Err(MdlError::Download {
                    url: link.to_string(),
                    message: e.to_string(),
                });
            }
        };
        if let Err(e) = dest_file.write_all(&chunk).await {
            tracing::error!("Error writing to destination file {}", dest_path.display());
            tracing::error!("{} | {}", e, e.kind());
            return Err(MdlError::Download {
                url: link.to_string(),
                message: format!("{} | {} : {}", e, e.kind(), dest_path.display()),
            });
        }
        bytes_written += chunk.len() as u64;
        if progress_due(
            f_size,
            Instant::now().duration_since(last_update_time),
            progress_update_interval,
        ) {
            ctx.try_notify(Update::ProgressUpdate(Progress {
                bytes_written,
                file_size: f_size,
                resource_name: f_name.clone(),
            }));
            last_update_time = Instant::now();
        }
    }
    if let Err(e) = dest_file.flush().await {
        return Err(MdlError::Download {
            url: link.to_string(),
            message: format!("{} | {} : {}", e, e.kind(), dest_path.display()),
        });
    }

    tracing::debug!("Download completed for {}, file @ {}", link, dest_path.display());
    ctx.notify(Update::ProgressUpdate(Progress {
        bytes_written,
        file_size: if f_size == 0 { bytes_written } else { f_size },
        resource_name: f_name,
    }))
    .await;
    Ok(Some(dest_path))
}

/// Writes the course's external links file. Nothing is written when the
/// course has no external links.
#[tracing::instrument(skip(ctx, resources))]
pub async fn write_external_links(
    ctx: &RunContext,
    destination_dir: &Path,
    resources: &ResourceMap,
) -> Result<Option<PathBuf>, MdlError> {
    let fragment = external_links_fragment(resources);
    if fragment.is_empty() {
        return Ok(None);
    }

    let dest_path = destination_dir.join(EXTERNAL_LINKS_FILE_NAME);
    let write_error = |e: std::io::Error| MdlError::Write {
        file_name: dest_path.to_string_lossy().to_string(),
        message: format!("{} | {}", e, e.kind()),
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest_path)
        .await
        .map_err(write_error)?;
    file.write_all(fragment.as_bytes()).await.map_err(write_error)?;
    file.flush().await.map_err(write_error)?;

    ctx.notify(Update::MessageUpdate(Message {
        content: "External links saved".into(),
        resource_name: dest_path.to_string_lossy().to_string(),
        is_error: false,
    }))
    .await;
    Ok(Some(dest_path))
}
