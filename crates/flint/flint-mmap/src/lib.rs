use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// A named shared-memory object mapped read-write into this process.
pub struct ShmSegment {
    _file: File,
    mmap: MmapMut,
    path: PathBuf,
}

/// Resolve a segment name to the backing path.
///
/// Bare names live under `/dev/shm` on Linux (what `shm_open` uses) and
/// under the temp dir elsewhere. Anything containing a `/` is taken as a path.
pub fn shm_path(name: &str) -> PathBuf {
    if name.contains('/') {
        return PathBuf::from(name);
    }
    if cfg!(target_os = "linux") {
        Path::new("/dev/shm").join(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

impl ShmSegment {
    /// Open `name`, creating it if absent, resize it to exactly `size_bytes`
    /// and map it read-write.
    ///
    /// Existing contents are kept when the size already matches, so a second
    /// process attaching to the same name sees the first one's data.
    pub fn open_or_create(name: &str, size_bytes: u64) -> io::Result<Self> {
        let path = shm_path(name);
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).write(true);
        #[cfg(unix)]
        opts.mode(0o666);
        let file = opts.open(&path)?;

        if file.metadata()?.len() != size_bytes {
            file.set_len(size_bytes)?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        tracing::debug!(path = %path.display(), size_bytes, "mapped shared memory segment");
        Ok(Self {
            _file: file,
            mmap,
            path,
        })
    }

    /// Return raw pointer to start of the mapped data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the mapping alive for the rest of the process and return its base.
    ///
    /// The segment is never unmapped afterwards.
    pub fn leak(self) -> *mut u8 {
        let this = Box::leak(Box::new(self));
        this.as_mut_ptr()
    }
}

/// Remove the named object. Mappings already established stay valid.
pub fn unlink(name: &str) -> io::Result<()> {
    std::fs::remove_file(shm_path(name))
}
