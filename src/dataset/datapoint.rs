//! Datapoint folders on disk.
//!
//! A dataset is a directory of numerically named folders, one per datapoint:
//!
//! ```text
//! <dataset>/<id>/plot.py
//! <dataset>/<id>/data_load.py
//! <dataset>/<id>/task.json
//! <dataset>/<id>/data_descr.txt
//! <dataset>/<id>/*.png
//! ```
//!
//! Only `plot.py` and at least one PNG are mandatory; the other files appear
//! as the dataset moves through the pipeline.

use crate::models::{PlotbenchError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PLOT_CODE_FILE: &str = "plot.py";
pub const TASK_FILE: &str = "task.json";
pub const DATA_DESCRIPTION_FILE: &str = "data_descr.txt";

/// Contents of one datapoint folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub id: u64,
    pub dir: PathBuf,
    pub code_plot: String,
    /// Task sections, in file order
    pub task: Option<Map<String, Value>>,
    pub data_description: Option<String>,
    /// Ground-truth images, sorted by path
    pub images: Vec<PathBuf>,
}

impl Datapoint {
    /// Read the datapoint stored in `dir`, whose name must be its numeric id.
    pub fn read(dir: &Path) -> Result<Self> {
        let id = folder_id(dir).ok_or_else(|| {
            PlotbenchError::InvalidInput(format!("{} is not a datapoint folder", dir.display()))
        })?;

        let images = ground_truth_images(dir)?;
        if images.is_empty() {
            return Err(missing(dir, "*.png"));
        }

        let task = match read_optional(dir, TASK_FILE)? {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                PlotbenchError::ParseError(format!("{}: {e}", dir.join(TASK_FILE).display()))
            })?),
            None => None,
        };

        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            code_plot: read_required(dir, PLOT_CODE_FILE)?,
            task,
            data_description: read_optional(dir, DATA_DESCRIPTION_FILE)?,
            images,
        })
    }

    pub fn require_task(&self) -> Result<&Map<String, Value>> {
        self.task.as_ref().ok_or_else(|| missing(&self.dir, TASK_FILE))
    }

    pub fn require_data_description(&self) -> Result<&str> {
        self.data_description
            .as_deref()
            .ok_or_else(|| missing(&self.dir, DATA_DESCRIPTION_FILE))
    }
}

/// Numeric id of a datapoint folder, if its name is all digits.
pub fn folder_id(dir: &Path) -> Option<u64> {
    let name = dir.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Ground-truth image used for judging: the first PNG in sorted order.
pub fn ground_truth(dir: &Path) -> Result<Option<PathBuf>> {
    Ok(ground_truth_images(dir)?.into_iter().next())
}

/// All `*.png` files of a folder, sorted.
pub fn ground_truth_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.png", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| PlotbenchError::InvalidInput(format!("bad image pattern {pattern}: {e}")))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PlotbenchError::io("listing images", e.into()))?;
        images.push(path);
    }
    images.sort();
    Ok(images)
}

fn read_required(dir: &Path, name: &str) -> Result<String> {
    read_optional(dir, name)?.ok_or_else(|| missing(dir, name))
}

fn read_optional(dir: &Path, name: &str) -> Result<Option<String>> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PlotbenchError::io(format!("reading {}", path.display()), e)),
    }
}

fn missing(dir: &Path, name: &str) -> PlotbenchError {
    PlotbenchError::io(
        format!("datapoint {}", dir.display()),
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("{name} not found")),
    )
}

/// Ordered list of datapoint folders under a dataset root.
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    root: PathBuf,
    folders: Vec<(u64, PathBuf)>,
}

impl DatasetLoader {
    /// Scan `root` for datapoint folders, ordered by id.
    pub fn open(root: &Path) -> Result<Self> {
        let entries = fs::read_dir(root)
            .map_err(|e| PlotbenchError::io(format!("reading dataset {}", root.display()), e))?;

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PlotbenchError::io("reading dataset entry", e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match folder_id(&path) {
                Some(id) => folders.push((id, path)),
                None => debug!(path = %path.display(), "Skipping non-datapoint folder"),
            }
        }
        folders.sort_by_key(|(id, _)| *id);

        info!(root = %root.display(), datapoints = folders.len(), "Loaded dataset");
        Ok(Self {
            root: root.to_path_buf(),
            folders,
        })
    }

    /// Reorder the datapoints with a seeded shuffle.
    pub fn shuffled(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.folders.shuffle(&mut rng);
        self
    }

    /// Keep at most `limit` datapoints.
    pub fn limited(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.folders.truncate(limit);
        }
        self
    }

    pub fn ids(&self) -> Vec<u64> {
        self.folders.iter().map(|(id, _)| *id).collect()
    }

    /// Folder of datapoint `id`, whether or not it is in the current selection.
    pub fn folder(&self, id: u64) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Ground truth of datapoint `id`. `None` when the folder or its images are missing.
    pub fn ground_truth(&self, id: u64) -> Result<Option<PathBuf>> {
        let folder = self.folder(id);
        if !folder.is_dir() {
            return Ok(None);
        }
        ground_truth(&folder)
    }

    /// Read every selected datapoint, in order.
    pub fn load_all(&self) -> Result<Vec<Datapoint>> {
        self.folders.iter().map(|(_, dir)| Datapoint::read(dir)).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_datapoint;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_only_numeric_folders_in_numeric_order() {
        let root = TempDir::new().unwrap();
        for id in [10, 2, 1] {
            write_datapoint(root.path(), id);
        }
        fs::create_dir_all(root.path().join("temp")).unwrap();
        fs::create_dir_all(root.path().join("3a")).unwrap();
        fs::write(root.path().join("42"), "a file, not a folder").unwrap();

        let loader = DatasetLoader::open(root.path()).unwrap();
        assert_eq!(loader.ids(), vec![1, 2, 10]);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let root = TempDir::new().unwrap();
        for id in 0..20 {
            write_datapoint(root.path(), id);
        }

        let a = DatasetLoader::open(root.path()).unwrap().shuffled(42).ids();
        let b = DatasetLoader::open(root.path()).unwrap().shuffled(42).ids();
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_datapoint() {
        let root = TempDir::new().unwrap();
        let dir = write_datapoint(root.path(), 7);
        fs::write(dir.join("plot_0.png"), [0x89]).unwrap();

        let dp = Datapoint::read(&dir).unwrap();
        assert_eq!(dp.id, 7);
        assert_eq!(dp.code_plot, "plt.plot([7])\n");
        assert_eq!(dp.images.len(), 2);
        assert_eq!(ground_truth(&dir).unwrap().unwrap().file_name().unwrap(), "plot_0.png");

        let keys: Vec<&String> = dp.require_task().unwrap().keys().collect();
        assert_eq!(keys, ["setup", "data description", "plot description", "plot style"]);
    }

    #[test]
    fn test_glob_metacharacters_in_dataset_path() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("plots [v2] *");
        let dir = write_datapoint(&root, 4);

        let dp = Datapoint::read(&dir).unwrap();
        assert_eq!(dp.images, vec![dir.join("plot_1.png")]);

        let loader = DatasetLoader::open(&root).unwrap();
        assert_eq!(loader.ground_truth(4).unwrap(), Some(dir.join("plot_1.png")));
        assert_eq!(loader.ground_truth(99).unwrap(), None);
    }

    #[test]
    fn test_missing_image_is_fatal() {
        let root = TempDir::new().unwrap();
        let dir = write_datapoint(root.path(), 3);
        fs::remove_file(dir.join("plot_1.png")).unwrap();

        let err = Datapoint::read(&dir).unwrap_err();
        assert!(matches!(err, PlotbenchError::Io { .. }));
    }

    #[test]
    fn test_optional_files() {
        let root = TempDir::new().unwrap();
        let dir = write_datapoint(root.path(), 5);
        fs::remove_file(dir.join(TASK_FILE)).unwrap();

        let dp = Datapoint::read(&dir).unwrap();
        assert!(dp.task.is_none());
        assert!(dp.require_task().is_err());
        assert_eq!(dp.require_data_description().unwrap(), "x: int\ny: float");
    }
}
