//! Intel accelerator pool over the i915 DRM sysfs interface
//!
//! Each `card<N>` with an Intel vendor id is one GPU. Its chips are the
//! `gt/gt<M>` tiles; older kernels without per-tile directories expose a
//! single set of `gt_*` files on the card itself.

use crate::error::HardwareError;
use crate::levelzero::traits::LevelZeroDevicePool;

use std::fs;
use std::path::{Path, PathBuf};

/// Default sysfs DRM directory
pub const DEFAULT_DRM_ROOT: &str = "/sys/class/drm";

const INTEL_VENDOR: &str = "0x8086";

struct Chip {
    dir: PathBuf,
    prefix: &'static str,
}

impl Chip {
    fn path(&self, attribute: &str) -> PathBuf {
        self.dir.join(format!("{}{}_freq_mhz", self.prefix, attribute))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> HardwareError {
    match source.kind() {
        std::io::ErrorKind::PermissionDenied => {
            HardwareError::InsufficientPermissions(path.display().to_string())
        }
        _ => HardwareError::Io {
            path: path.display().to_string(),
            source,
        },
    }
}

fn read_mhz(path: &Path) -> Result<f64, HardwareError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    content.trim().parse().map_err(|_| HardwareError::Malformed {
        path: path.display().to_string(),
        value: content.trim().to_string(),
    })
}

fn write_mhz(path: &Path, mhz: f64) -> Result<(), HardwareError> {
    if !mhz.is_finite() || mhz < 0.0 {
        return Err(HardwareError::InvalidArgument(format!(
            "{}: {} MHz is not a valid frequency",
            path.display(),
            mhz
        )));
    }
    fs::write(path, (mhz.round() as u64).to_string()).map_err(|e| io_error(path, e))
}

/// Numbered children of `dir` named `<prefix><N>`, in index order
fn numbered(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, HardwareError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    let mut found: Vec<(usize, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let index = name.strip_prefix(prefix)?.parse().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

fn is_intel(card: &Path) -> bool {
    fs::read_to_string(card.join("device/vendor"))
        .map(|vendor| vendor.trim() == INTEL_VENDOR)
        .unwrap_or(false)
}

fn card_chips(card: &Path) -> Result<Vec<Chip>, HardwareError> {
    let tiles = card.join("gt");
    if tiles.is_dir() {
        let chips: Vec<Chip> = numbered(&tiles, "gt")?
            .into_iter()
            .map(|dir| Chip { dir, prefix: "rps_" })
            .collect();
        if !chips.is_empty() {
            return Ok(chips);
        }
    }
    Ok(vec![Chip {
        dir: card.to_path_buf(),
        prefix: "gt_",
    }])
}

/// Intel GPUs found under a DRM sysfs root
pub struct DrmPool {
    gpus: Vec<Vec<Chip>>,
}

impl DrmPool {
    /// Scan the default DRM root
    pub fn new() -> Result<Self, HardwareError> {
        Self::with_root(DEFAULT_DRM_ROOT)
    }

    /// Scan `root` for Intel cards
    ///
    /// Fails when no card is found or cards disagree on their chip count.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, HardwareError> {
        let root = root.as_ref();
        let mut gpus = Vec::new();
        for card in numbered(root, "card")? {
            if is_intel(&card) {
                gpus.push(card_chips(&card)?);
            }
        }
        let Some(first) = gpus.first() else {
            return Err(HardwareError::NotSupported(format!(
                "no Intel GPU under {}",
                root.display()
            )));
        };
        let chips = first.len();
        if gpus.iter().any(|g| g.len() != chips) {
            return Err(HardwareError::InitializationFailed(
                "Intel GPUs report different numbers of chips".to_string(),
            ));
        }
        log::debug!("Found {} Intel GPUs with {} chips each", gpus.len(), chips);
        Ok(Self { gpus })
    }

    fn chip(&self, gpu: usize, subdevice: usize) -> Result<&Chip, HardwareError> {
        self.gpus
            .get(gpu)
            .and_then(|chips| chips.get(subdevice))
            .ok_or(HardwareError::DeviceNotFound(gpu as u32))
    }

    fn read(&self, gpu: usize, subdevice: usize, attribute: &str) -> Result<f64, HardwareError> {
        read_mhz(&self.chip(gpu, subdevice)?.path(attribute))
    }
}

impl LevelZeroDevicePool for DrmPool {
    fn num_gpu(&self) -> Result<usize, HardwareError> {
        Ok(self.gpus.len())
    }

    fn num_gpu_chip(&self) -> Result<usize, HardwareError> {
        Ok(self.gpus.iter().map(Vec::len).sum())
    }

    fn frequency_status(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.read(gpu, subdevice, "act")
    }

    fn frequency_efficient(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.read(gpu, subdevice, "RP1")
    }

    fn frequency_min(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.read(gpu, subdevice, "RPn")
    }

    fn frequency_max(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.read(gpu, subdevice, "RP0")
    }

    fn frequency_range(&self, gpu: usize, subdevice: usize) -> Result<(f64, f64), HardwareError> {
        Ok((
            self.read(gpu, subdevice, "min")?,
            self.read(gpu, subdevice, "max")?,
        ))
    }

    /// The kernel rejects a minimum above the current maximum, so the bound
    /// moving away from the other one is written first.
    fn frequency_control(
        &self,
        gpu: usize,
        subdevice: usize,
        min_mhz: f64,
        max_mhz: f64,
    ) -> Result<(), HardwareError> {
        let chip = self.chip(gpu, subdevice)?;
        let (min_path, max_path) = (chip.path("min"), chip.path("max"));
        let current_max = read_mhz(&max_path)?;
        if min_mhz > current_max {
            write_mhz(&max_path, max_mhz)?;
            write_mhz(&min_path, min_mhz)
        } else {
            write_mhz(&min_path, min_mhz)?;
            write_mhz(&max_path, max_mhz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_card(root: &Path, card: &str, vendor: &str, tiles: &[&str]) {
        let dir = root.join(card);
        fs::create_dir_all(dir.join("device")).unwrap();
        fs::write(dir.join("device/vendor"), format!("{}\n", vendor)).unwrap();
        let chips: Vec<(PathBuf, &str)> = if tiles.is_empty() {
            vec![(dir.clone(), "gt_")]
        } else {
            tiles.iter().map(|t| (dir.join("gt").join(t), "rps_")).collect()
        };
        for (chip, prefix) in chips {
            fs::create_dir_all(&chip).unwrap();
            for (attr, mhz) in [
                ("act", 1100),
                ("RP1", 800),
                ("RPn", 300),
                ("RP0", 1600),
                ("min", 300),
                ("max", 1600),
            ] {
                fs::write(chip.join(format!("{}{}_freq_mhz", prefix, attr)), format!("{}\n", mhz))
                    .unwrap();
            }
        }
    }

    fn read_file(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap().trim().to_string()
    }

    #[test]
    fn test_scan_skips_other_vendors_and_connectors() {
        let dir = tempfile::tempdir().unwrap();
        write_card(dir.path(), "card0", "0x8086", &["gt0", "gt1"]);
        write_card(dir.path(), "card1", "0x10de", &[]);
        write_card(dir.path(), "card2", "0x8086", &["gt1", "gt0"]);
        fs::create_dir_all(dir.path().join("card0-DP-1")).unwrap();

        let pool = DrmPool::with_root(dir.path()).unwrap();
        assert_eq!(pool.num_gpu().unwrap(), 2);
        assert_eq!(pool.num_gpu_chip().unwrap(), 4);
        assert_eq!(pool.frequency_status(1, 1).unwrap(), 1100.0);
        assert_eq!(pool.frequency_range(0, 0).unwrap(), (300.0, 1600.0));
        assert!(matches!(
            pool.frequency_max(2, 0),
            Err(HardwareError::DeviceNotFound(2))
        ));
    }

    #[test]
    fn test_card_without_tiles_is_one_chip() {
        let dir = tempfile::tempdir().unwrap();
        write_card(dir.path(), "card0", "0x8086", &[]);
        let pool = DrmPool::with_root(dir.path()).unwrap();
        assert_eq!(pool.num_gpu_chip().unwrap(), 1);
        assert_eq!(pool.frequency_efficient(0, 0).unwrap(), 800.0);
    }

    #[test]
    fn test_uneven_chip_counts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_card(dir.path(), "card0", "0x8086", &["gt0", "gt1"]);
        write_card(dir.path(), "card1", "0x8086", &["gt0"]);
        assert!(matches!(
            DrmPool::with_root(dir.path()),
            Err(HardwareError::InitializationFailed(_))
        ));
        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            DrmPool::with_root(empty.path()),
            Err(HardwareError::NotSupported(_))
        ));
    }

    #[test]
    fn test_frequency_window_written_in_safe_order() {
        let dir = tempfile::tempdir().unwrap();
        write_card(dir.path(), "card0", "0x8086", &["gt0"]);
        let pool = DrmPool::with_root(dir.path()).unwrap();
        let tile = dir.path().join("card0/gt/gt0");

        pool.frequency_control(0, 0, 400.0, 900.0).unwrap();
        assert_eq!(read_file(tile.join("rps_min_freq_mhz")), "400");
        assert_eq!(read_file(tile.join("rps_max_freq_mhz")), "900");

        pool.frequency_control(0, 0, 1200.0, 1500.0).unwrap();
        assert_eq!(pool.frequency_range(0, 0).unwrap(), (1200.0, 1500.0));

        assert!(matches!(
            pool.frequency_control(0, 0, f64::NAN, 1500.0),
            Err(HardwareError::InvalidArgument(_))
        ));
        assert_eq!(read_file(tile.join("rps_min_freq_mhz")), "1200");
    }
}
