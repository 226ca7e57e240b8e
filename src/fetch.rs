use crate::config::{DatasetPaths, PipelineConfig};
use crate::models::DatasetId;
use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn is_archive(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Last path segment of a URL, without query string.
fn file_name_from_url(url: &str) -> Result<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !is_remote(name) => Ok(name),
        _ => bail!("Cannot derive a file name from URL: {url}"),
    }
}

/// The archive member holding the data: `allCountries.zip` holds `allCountries.txt`.
pub fn archive_member(archive: &Path) -> Result<String> {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Invalid archive name: {}", archive.display()))?;
    Ok(format!("{stem}.txt"))
}

/// Downloads `url` into `dest_dir` and returns the local path.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    pb: &ProgressBar,
) -> Result<PathBuf> {
    let output_path = dest_dir.join(file_name_from_url(url)?);
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?;
    if !response.status().is_success() {
        bail!("Failed to download {}: {}", url, response.status());
    }

    if let Some(total) = response.content_length() {
        pb.set_length(total);
    }

    // Written under a temporary name so an interrupted download is never reused.
    let partial_path = output_path.with_extension("partial");
    let mut file = File::create(&partial_path)
        .with_context(|| format!("Failed to create {}", partial_path.display()))?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Download interrupted: {url}"))?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;
    fs::rename(&partial_path, &output_path)
        .with_context(|| format!("Failed to move download into {}", output_path.display()))?;

    info!(url, bytes = downloaded, path = %output_path.display(), "Downloaded");
    Ok(output_path)
}

/// Extracts the data member of a zip archive into `dest_dir`.
pub fn extract(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let member = archive_member(archive)?;
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive: {}", archive.display()))?;
    let mut entry = zip
        .by_name(&member)
        .with_context(|| format!("Missing {member} in archive {}", archive.display()))?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;
    let output_path = dest_dir.join(&member);
    // Only a complete, checksum-verified member gets the final name.
    let partial_path = dest_dir.join(format!("{member}.partial"));
    let mut output = File::create(&partial_path)
        .with_context(|| format!("Failed to create {}", partial_path.display()))?;
    let bytes = match io::copy(&mut entry, &mut output) {
        Ok(bytes) => bytes,
        Err(e) => {
            drop(output);
            let _ = fs::remove_file(&partial_path);
            return Err(e).with_context(|| format!("Failed to extract {member}"));
        }
    };
    output.flush()?;
    drop(output);
    fs::rename(&partial_path, &output_path)
        .with_context(|| format!("Failed to move {member} into {}", output_path.display()))?;

    info!(archive = %archive.display(), member = %member, bytes, "Extracted");
    Ok(output_path)
}

/// Downloads `url` into `dest_dir` and extracts its data member next to it.
pub async fn fetch_and_extract(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    pb: &ProgressBar,
) -> Result<PathBuf> {
    let archive = fetch(client, url, dest_dir, pb).await?;
    let dest_dir = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&archive, &dest_dir))
        .await
        .context("Extraction task panicked")?
}

/// Turns one dataset location into a readable local file.
///
/// Local paths are used in place (archives are extracted into the work
/// directory). Remote files already present in the work directory are reused
/// unless `force` is set.
async fn resolve_dataset(
    client: reqwest::Client,
    dataset: DatasetId,
    location: String,
    work_dir: PathBuf,
    force: bool,
    pb: ProgressBar,
) -> Result<PathBuf> {
    let dest_dir = work_dir.join(dataset.as_str());

    if !is_remote(&location) {
        let path = PathBuf::from(&location);
        if !path.exists() {
            bail!("{dataset} dataset not found at: {location}");
        }
        pb.finish_with_message("local");
        if is_archive(&path) {
            return tokio::task::spawn_blocking(move || extract(&path, &dest_dir))
                .await
                .context("Extraction task panicked")?;
        }
        return Ok(path);
    }

    let file_name = file_name_from_url(&location)?;
    let remote_is_archive = is_archive(Path::new(file_name));
    let cached = if remote_is_archive {
        dest_dir.join(archive_member(Path::new(file_name))?)
    } else {
        dest_dir.join(file_name)
    };
    if !force && cached.exists() {
        info!(dataset = %dataset, path = %cached.display(), "Using cached download");
        pb.finish_with_message("cached");
        return Ok(cached);
    }

    let path = if remote_is_archive {
        fetch_and_extract(&client, &location, &dest_dir, &pb).await?
    } else {
        fetch(&client, &location, &dest_dir, &pb).await?
    };
    pb.finish_with_message("done");
    Ok(path)
}

/// Makes every dataset available locally, at most `max_parallel_fetches` at a time.
/// Any failure aborts the whole fetch phase.
pub async fn fetch_all(config: &PipelineConfig) -> Result<DatasetPaths> {
    let client = reqwest::Client::new();
    let mp = MultiProgress::new();
    let mut paths = DatasetPaths::default();

    let mut in_flight = FuturesUnordered::new();
    let mut pending = DatasetId::ALL.iter().copied();
    let max_parallel = config.max_parallel_fetches.max(1);

    let spawn_next = |dataset: DatasetId| {
        let pb = mp.add(make_progress_bar(dataset));
        let task = resolve_dataset(
            client.clone(),
            dataset,
            config.datasets.get(dataset).clone(),
            config.work_dir.clone(),
            config.force_download,
            pb,
        );
        tokio::spawn(async move { (dataset, task.await) })
    };

    for dataset in pending.by_ref().take(max_parallel) {
        in_flight.push(spawn_next(dataset));
    }

    while let Some(join_result) = in_flight.next().await {
        let (dataset, result) = join_result.context("Fetch task join error")?;
        let path = result.with_context(|| format!("Failed to fetch {dataset} dataset"))?;
        *paths.get_mut(dataset) = path;

        if let Some(dataset) = pending.next() {
            in_flight.push(spawn_next(dataset));
        }
    }

    Ok(paths)
}

fn make_progress_bar(dataset: DatasetId) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {:<12} [{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{msg}}",
                dataset.as_str()
            ))
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
