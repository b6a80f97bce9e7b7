use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

bitflags! {
    /// SSH_FXF_* open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREATE = 0x0000_0008;
        const TRUNCATE = 0x0000_0010;
        const EXCLUSIVE = 0x0000_0020;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        const OVERWRITE = 0x0000_0001;
        const ATOMIC = 0x0000_0002;
        const NATIVE = 0x0000_0004;
    }
}

bitflags! {
    /// Presence flags of an attribute record (SSH_FILEXFER_ATTR_*).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttrFlags: u32 {
        const SIZE = 0x0000_0001;
        const UIDGID = 0x0000_0002;
        const PERMISSIONS = 0x0000_0004;
        const ACMODTIME = 0x0000_0008;
    }
}

/// Permission and type bits of the `permissions` attribute.
pub mod mode {
    pub const S_IRWXU: u32 = 0o700;
    pub const S_IRUSR: u32 = 0o400;
    pub const S_IWUSR: u32 = 0o200;
    pub const S_IXUSR: u32 = 0o100;
    pub const S_IRWXG: u32 = 0o070;
    pub const S_IRGRP: u32 = 0o040;
    pub const S_IWGRP: u32 = 0o020;
    pub const S_IXGRP: u32 = 0o010;
    pub const S_IRWXO: u32 = 0o007;
    pub const S_IROTH: u32 = 0o004;
    pub const S_IWOTH: u32 = 0o002;
    pub const S_IXOTH: u32 = 0o001;

    pub const PERMISSION_MASK: u32 = S_IRWXU | S_IRWXG | S_IRWXO;

    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFIFO: u32 = 0o010000;
    pub const S_IFCHR: u32 = 0o020000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFBLK: u32 = 0o060000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFLNK: u32 = 0o120000;
    pub const S_IFSOCK: u32 = 0o140000;
}

/// Builder over [`OpenFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    flags: OpenFlags,
}

impl OpenOptions {
    pub fn new() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn read(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::READ);
        self
    }

    pub fn write(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::WRITE);
        self
    }

    pub fn append(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::WRITE | OpenFlags::APPEND);
        self
    }

    pub fn create(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::CREATE);
        self
    }

    pub fn truncate(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::TRUNCATE);
        self
    }

    /// Fail if the file already exists.
    pub fn exclusive(&mut self) -> &mut Self {
        self.flags.insert(OpenFlags::CREATE | OpenFlags::EXCLUSIVE);
        self
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }
}

impl From<&mut OpenOptions> for OpenFlags {
    fn from(value: &mut OpenOptions) -> Self {
        value.flags
    }
}

impl From<OpenOptions> for OpenFlags {
    fn from(value: OpenOptions) -> Self {
        value.flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    NamedPipe,
    CharDevice,
    Directory,
    BlockDevice,
    Regular,
    Symlink,
    Socket,
}

impl FileType {
    /// Decodes the S_IFMT bits; `None` for a type the wire doesn't name.
    pub fn from_mode(permissions: u32) -> Option<FileType> {
        match permissions & mode::S_IFMT {
            mode::S_IFIFO => Some(FileType::NamedPipe),
            mode::S_IFCHR => Some(FileType::CharDevice),
            mode::S_IFDIR => Some(FileType::Directory),
            mode::S_IFBLK => Some(FileType::BlockDevice),
            mode::S_IFREG => Some(FileType::Regular),
            mode::S_IFLNK => Some(FileType::Symlink),
            mode::S_IFSOCK => Some(FileType::Socket),
            _ => None,
        }
    }

    pub fn type_bits(&self) -> u32 {
        match self {
            FileType::NamedPipe => mode::S_IFIFO,
            FileType::CharDevice => mode::S_IFCHR,
            FileType::Directory => mode::S_IFDIR,
            FileType::BlockDevice => mode::S_IFBLK,
            FileType::Regular => mode::S_IFREG,
            FileType::Symlink => mode::S_IFLNK,
            FileType::Socket => mode::S_IFSOCK,
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, FileType::CharDevice | FileType::BlockDevice)
    }
}

/// Sparse attribute record as carried on the wire.
///
/// A field is only meaningful when its presence flag is set; every accessor
/// answers `None` otherwise, so absence never reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteAttributes {
    flags: AttrFlags,
    size: u64,
    uid: u32,
    gid: u32,
    permissions: u32,
    atime: u64,
    mtime: u64,
}

impl RemoteAttributes {
    pub fn new() -> RemoteAttributes {
        RemoteAttributes::default()
    }

    pub fn flags(&self) -> AttrFlags {
        self.flags
    }

    pub fn size(&self) -> Option<u64> {
        self.flags.contains(AttrFlags::SIZE).then_some(self.size)
    }

    pub fn uid(&self) -> Option<u32> {
        self.flags.contains(AttrFlags::UIDGID).then_some(self.uid)
    }

    pub fn gid(&self) -> Option<u32> {
        self.flags.contains(AttrFlags::UIDGID).then_some(self.gid)
    }

    /// Raw mode including the type bits.
    pub fn permissions(&self) -> Option<u32> {
        self.flags.contains(AttrFlags::PERMISSIONS).then_some(self.permissions)
    }

    pub fn atime(&self) -> Option<u64> {
        self.flags.contains(AttrFlags::ACMODTIME).then_some(self.atime)
    }

    pub fn mtime(&self) -> Option<u64> {
        self.flags.contains(AttrFlags::ACMODTIME).then_some(self.mtime)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.flags.insert(AttrFlags::SIZE);
        self.size = size;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.flags.insert(AttrFlags::UIDGID);
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.flags.insert(AttrFlags::PERMISSIONS);
        self.permissions = permissions;
        self
    }

    pub fn with_times(mut self, atime: u64, mtime: u64) -> Self {
        self.flags.insert(AttrFlags::ACMODTIME);
        self.atime = atime;
        self.mtime = mtime;
        self
    }

    /// Copies every field present in `other` over this record.
    pub fn apply(&mut self, other: &RemoteAttributes) {
        if let Some(size) = other.size() {
            *self = self.with_size(size);
        }
        if let (Some(uid), Some(gid)) = (other.uid(), other.gid()) {
            *self = self.with_owner(uid, gid);
        }
        if let Some(permissions) = other.permissions() {
            *self = self.with_permissions(permissions);
        }
        if let (Some(atime), Some(mtime)) = (other.atime(), other.mtime()) {
            *self = self.with_times(atime, mtime);
        }
    }
}

/// Name plus attributes of a remote object, returned by stat calls and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    attributes: RemoteAttributes,
}

impl Metadata {
    pub fn new(name: impl Into<String>, attributes: RemoteAttributes) -> Metadata {
        Metadata {
            name: name.into(),
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &RemoteAttributes {
        &self.attributes
    }

    pub fn len(&self) -> Option<u64> {
        self.attributes.size()
    }

    pub fn uid(&self) -> Option<u32> {
        self.attributes.uid()
    }

    pub fn gid(&self) -> Option<u32> {
        self.attributes.gid()
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.attributes.permissions().and_then(FileType::from_mode)
    }

    /// The nine rwx bits.
    pub fn permissions(&self) -> Option<u32> {
        self.attributes
            .permissions()
            .map(|permissions| permissions & mode::PERMISSION_MASK)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.attributes.mtime().map(epoch_seconds)
    }

    pub fn accessed(&self) -> Option<SystemTime> {
        self.attributes.atime().map(epoch_seconds)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }
}

fn epoch_seconds(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

/// Last component of a remote path, `/` for the root.
pub(crate) fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(index) => &trimmed[index + 1..],
        None => trimmed,
    }
}
