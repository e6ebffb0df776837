use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

const OS_RELEASE: &[&str] = &["etc/os-release", "usr/lib/os-release"];
const DEVICE_MODEL: &[&str] = &[
    "proc/device-tree/model",
    "sys/firmware/devicetree/base/model",
];
const CPU_INFO: &[&str] = &["proc/cpuinfo"];
const MEM_INFO: &[&str] = &["proc/meminfo"];
const CPU_TIMES: &[&str] = &["proc/stat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    OsRelease,
    DeviceModel,
    CpuInfo,
    MemInfo,
    CpuTimes,
    Thermal,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::OsRelease => "os-release",
            Source::DeviceModel => "device-model",
            Source::CpuInfo => "cpuinfo",
            Source::MemInfo => "meminfo",
            Source::CpuTimes => "stat",
            Source::Thermal => "thermal-zone",
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("источник {source_name} не найден")]
    Missing { source_name: &'static str },
    #[error("не удалось прочитать {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("в {path} нет корректного поля {field}")]
    Malformed { path: String, field: &'static str },
}

#[derive(Debug)]
pub struct SourceText {
    pub path: PathBuf,
    pub text: String,
}

impl SourceText {
    pub fn malformed(&self, field: &'static str) -> SourceError {
        SourceError::Malformed {
            path: self.path.display().to_string(),
            field,
        }
    }
}

// Roots are tried in order, then relative candidates within a root.
#[derive(Debug, Clone)]
pub struct SourcePaths {
    roots: Vec<PathBuf>,
    thermal_zone: String,
}

impl SourcePaths {
    pub fn new(roots: Vec<PathBuf>, thermal_zone: impl Into<String>) -> Self {
        Self {
            roots,
            thermal_zone: thermal_zone.into(),
        }
    }

    pub fn candidates(&self, source: Source) -> Vec<PathBuf> {
        let relative: Vec<String> = match source {
            Source::OsRelease => to_owned(OS_RELEASE),
            Source::DeviceModel => to_owned(DEVICE_MODEL),
            Source::CpuInfo => to_owned(CPU_INFO),
            Source::MemInfo => to_owned(MEM_INFO),
            Source::CpuTimes => to_owned(CPU_TIMES),
            Source::Thermal => vec![format!("sys/class/thermal/{}/temp", self.thermal_zone)],
        };

        self.roots
            .iter()
            .flat_map(|root| relative.iter().map(move |rel| root.join(rel)))
            .collect()
    }

    // A read failure on the first existing candidate is final.
    pub fn read(&self, source: Source) -> Result<SourceText, SourceError> {
        let Some(path) = self
            .candidates(source)
            .into_iter()
            .find(|p| p.exists())
        else {
            return Err(SourceError::Missing {
                source_name: source.name(),
            });
        };

        match fs::read_to_string(&path) {
            Ok(text) => Ok(SourceText { path, text }),
            Err(err) => Err(SourceError::Read {
                path: path.display().to_string(),
                source: err,
            }),
        }
    }
}

fn to_owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}
