use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Delete `path` if it exists and create it again, empty
pub fn reset_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

/// Create `path` and its parents, keeping anything already there
pub fn ensure_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

/// Label file that belongs to a dataset image.
///
/// The last `images` component of the path becomes `labels` and the
/// extension becomes `.txt`, so `data/images/train/7.jpg` maps to
/// `data/labels/train/7.txt`.
pub fn label_path_for_image(image_path: &Path) -> PathBuf {
    let components: Vec<Component> = image_path.components().collect();
    let images_pos = components
        .iter()
        .rposition(|c| c.as_os_str() == OsStr::new("images"));

    let label_path: PathBuf = components
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if Some(i) == images_pos {
                OsStr::new("labels")
            } else {
                c.as_os_str()
            }
        })
        .collect();
    label_path.with_extension("txt")
}
