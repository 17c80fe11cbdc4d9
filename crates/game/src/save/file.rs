use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{SaveCursor, SaveError, SaveResult};

pub const SAVE_VERSION: u8 = 1;

const FILE_MAGIC: u64 = 0xFF4E_4F49_4745_4CFF;
const FILE_SEAL: u64 = 0xFF4C_4547_494F_4EFF;
const HEADER_LEN: usize = 8 + 8 + 1;

enum Mode {
    Write {
        file: BufWriter<File>,
        tmp: PathBuf,
        error: Option<io::Error>,
    },
    Read {
        file: BufReader<File>,
    },
}

/// File-backed cursor. A save is written to a temporary file whose seal stays
/// zero until [`SaveFile::close`] succeeds, then swapped over the target.
pub struct SaveFile {
    path: PathBuf,
    mode: Mode,
    version: u8,
    pos: usize,
    cap: usize,
}

impl SaveFile {
    pub fn create(path: impl AsRef<Path>, version: u8) -> SaveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp = with_suffix(&path, ".tmp");

        let mut file = BufWriter::new(File::create(&tmp)?);
        file.write_all(&FILE_MAGIC.to_le_bytes())?;
        file.write_all(&0u64.to_le_bytes())?;
        file.write_all(&[version])?;

        Ok(Self {
            path,
            mode: Mode::Write {
                file,
                tmp,
                error: None,
            },
            version,
            pos: 0,
            cap: usize::MAX,
        })
    }

    /// Opens a sealed save and validates its header. The version is returned
    /// to the caller through [`SaveFile::version`] so it can decide what it
    /// supports.
    pub fn open(path: impl AsRef<Path>) -> SaveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_LEN {
            return Err(SaveError::NotSave);
        }

        let mut file = BufReader::new(file);
        let mut word = [0u8; 8];

        file.read_exact(&mut word)?;
        if u64::from_le_bytes(word) != FILE_MAGIC {
            return Err(SaveError::NotSave);
        }

        file.read_exact(&mut word)?;
        if u64::from_le_bytes(word) != FILE_SEAL {
            return Err(SaveError::Unsealed);
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;

        Ok(Self {
            path,
            mode: Mode::Read { file },
            version: version[0],
            pos: 0,
            cap: len - HEADER_LEN,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Seals and moves a written save into place, keeping the previous file
    /// as a `.bak`. Returns the payload size.
    pub fn close(self) -> SaveResult<usize> {
        let Mode::Write { file, tmp, error } = self.mode else {
            return Ok(self.pos);
        };
        if let Some(err) = error {
            return Err(err.into());
        }

        let mut file = file.into_inner().map_err(|err| err.into_error())?;
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&FILE_SEAL.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        if self.path.exists() {
            fs::rename(&self.path, with_suffix(&self.path, ".bak"))?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(self.pos)
    }
}

impl SaveCursor for SaveFile {
    fn write(&mut self, src: &[u8]) -> usize {
        let Mode::Write { file, error, .. } = &mut self.mode else {
            return 0;
        };
        if error.is_some() {
            return 0;
        }
        match file.write_all(src) {
            Ok(()) => {
                self.pos += src.len();
                src.len()
            }
            Err(err) => {
                *error = Some(err);
                0
            }
        }
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let Mode::Read { file } = &mut self.mode else {
            return 0;
        };
        let len = dst.len().min(self.cap - self.pos);
        match file.read_exact(&mut dst[..len]) {
            Ok(()) => {
                self.pos += len;
                len
            }
            Err(err) => {
                log::warn!("save read failed on {}: {}", self.path.display(), err);
                self.cap = self.pos;
                0
            }
        }
    }

    fn len(&self) -> usize {
        self.pos
    }

    fn cap(&self) -> usize {
        self.cap
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::Magic;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("legion-{}-{}.save", name, std::process::id()))
    }

    #[test]
    fn sealed_save_round_trips() {
        let path = temp_path("round-trip");
        let mut save = SaveFile::create(&path, SAVE_VERSION).unwrap();
        save.write_magic(Magic::Sim);
        save.write_u64(42);
        save.write_magic(Magic::Sim);
        assert_eq!(save.close().unwrap(), 10);

        let mut save = SaveFile::open(&path).unwrap();
        assert_eq!(save.version(), SAVE_VERSION);
        save.read_magic(Magic::Sim).unwrap();
        assert_eq!(save.read_u64().unwrap(), 42);
        save.read_magic(Magic::Sim).unwrap();
        assert!(save.eof());

        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(with_suffix(&path, ".bak"));
    }

    #[test]
    fn unsealed_save_is_rejected() {
        let path = temp_path("unsealed");
        let mut save = SaveFile::create(&path, SAVE_VERSION).unwrap();
        save.write_u64(1);
        let Mode::Write { file, tmp, .. } = save.mode else {
            unreachable!()
        };
        drop(file);
        fs::rename(&tmp, &path).unwrap();

        assert!(matches!(SaveFile::open(&path), Err(SaveError::Unsealed)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn garbage_is_not_a_save() {
        let path = temp_path("garbage");
        fs::write(&path, b"definitely not a save file").unwrap();
        assert!(matches!(SaveFile::open(&path), Err(SaveError::NotSave)));
        let _ = fs::remove_file(&path);
    }
}
