/// Counters describing the work done by a tree operation.
///
/// Summaries of sibling subtrees are combined with `+`; a failed operation reports the
/// summary of everything that completed before the failure in [`crate::Error::summary`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub symlinks_created: usize,
    pub directories_created: usize,
    /// nodes relocated with a single rename
    pub files_moved: usize,
    pub symlinks_moved: usize,
    pub directories_moved: usize,
    pub files_removed: usize,
    pub symlinks_removed: usize,
    pub directories_removed: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            symlinks_created: self.symlinks_created + other.symlinks_created,
            directories_created: self.directories_created + other.directories_created,
            files_moved: self.files_moved + other.files_moved,
            symlinks_moved: self.symlinks_moved + other.symlinks_moved,
            directories_moved: self.directories_moved + other.directories_moved,
            files_removed: self.files_removed + other.files_removed,
            symlinks_removed: self.symlinks_removed + other.symlinks_removed,
            directories_removed: self.directories_removed + other.directories_removed,
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            symlinks created: {}\n\
            directories created: {}\n\
            files moved: {}\n\
            symlinks moved: {}\n\
            directories moved: {}\n\
            files removed: {}\n\
            symlinks removed: {}\n\
            directories removed: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.symlinks_created,
            self.directories_created,
            self.files_moved,
            self.symlinks_moved,
            self.directories_moved,
            self.files_removed,
            self.symlinks_removed,
            self.directories_removed,
        )
    }
}
