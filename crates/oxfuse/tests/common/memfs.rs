//! In-memory filesystem used by the mount tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use oxfuse::{
    ConnectionInfo, DirEntry, FileHandle, FuseError, FuseResult, Operations, Primitive, Stat,
    Timespec,
};
use oxfuse_mount::HandleTable;
use parking_lot::RwLock;

#[derive(Debug, Clone)]
enum Kind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
struct Node {
    kind: Kind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: Timespec,
    xattrs: BTreeMap<OsString, Vec<u8>>,
}

impl Node {
    fn new(kind: Kind, mode: u32) -> Self {
        let now = Timespec::from(std::time::SystemTime::now());
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
            mtime: now,
            xattrs: BTreeMap::new(),
        }
    }

    fn stat(&self) -> Stat {
        let mut st = match &self.kind {
            Kind::File(data) => Stat::file(self.mode, data.len() as i64),
            Kind::Dir => Stat::directory(self.mode),
            Kind::Symlink(target) => Stat::symlink(target.as_os_str().len() as i64),
        };
        st.uid = self.uid;
        st.gid = self.gid;
        st.with_times(self.mtime)
    }
}

fn errno<T>(e: i32) -> FuseResult<T> {
    Err(FuseError::Errno(e))
}

/// A flat map of absolute paths to nodes.
pub struct MemFs {
    nodes: RwLock<HashMap<PathBuf, Node>>,
    open: HandleTable<PathBuf>,
    /// Bumped by `destroy`; clone it before mounting.
    pub destroyed: Arc<AtomicUsize>,
}

impl Default for MemFs {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(PathBuf::from("/"), Node::new(Kind::Dir, 0o755));
        Self {
            nodes: RwLock::new(nodes),
            open: HandleTable::new(),
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MemFs {
    fn parent_is_dir(&self, path: &Path) -> FuseResult<()> {
        let parent = path.parent().ok_or(FuseError::Errno(libc::EINVAL))?;
        match self.nodes.read().get(parent).map(|n| &n.kind) {
            Some(Kind::Dir) => Ok(()),
            Some(_) => errno(libc::ENOTDIR),
            None => errno(libc::ENOENT),
        }
    }

    fn insert_new(&self, path: &Path, node: Node) -> FuseResult<()> {
        self.parent_is_dir(path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(path) {
            return errno(libc::EEXIST);
        }
        nodes.insert(path.to_path_buf(), node);
        Ok(())
    }

    fn children(&self, dir: &Path) -> Vec<(OsString, Stat)> {
        let mut out: Vec<_> = self
            .nodes
            .read()
            .iter()
            .filter(|(p, _)| p.parent() == Some(dir))
            .filter_map(|(p, n)| Some((p.file_name()?.to_owned(), n.stat())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn path_for(&self, path: Option<&Path>, fh: FileHandle) -> FuseResult<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => self
                .open
                .get(fh.0)
                .map(|p| p.value().clone())
                .ok_or(FuseError::Errno(libc::EBADF)),
        }
    }
}

impl Operations for MemFs {
    fn init(&self, conn: &mut ConnectionInfo) -> FuseResult<()> {
        tracing::info!(proto_major = conn.proto_major, "memfs init");
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn getattr(&self, path: Option<&Path>, fh: Option<FileHandle>) -> FuseResult<Stat> {
        let path = self.path_for(path, fh.unwrap_or_default())?;
        self.nodes
            .read()
            .get(&path)
            .map(Node::stat)
            .ok_or(FuseError::Errno(libc::ENOENT))
    }

    fn readlink(&self, path: &Path) -> FuseResult<PathBuf> {
        match self.nodes.read().get(path).map(|n| &n.kind) {
            Some(Kind::Symlink(target)) => Ok(target.clone()),
            Some(_) => errno(libc::EINVAL),
            None => errno(libc::ENOENT),
        }
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FuseResult<()> {
        self.insert_new(path, Node::new(Kind::Dir, mode & 0o7777))
    }

    fn unlink(&self, path: &Path) -> FuseResult<()> {
        let mut nodes = self.nodes.write();
        match nodes.get(path).map(|n| &n.kind) {
            Some(Kind::Dir) => errno(libc::EISDIR),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
            None => errno(libc::ENOENT),
        }
    }

    fn rmdir(&self, path: &Path) -> FuseResult<()> {
        if !self.children(path).is_empty() {
            return errno(libc::ENOTEMPTY);
        }
        let mut nodes = self.nodes.write();
        match nodes.get(path).map(|n| &n.kind) {
            Some(Kind::Dir) => {
                nodes.remove(path);
                Ok(())
            }
            Some(_) => errno(libc::ENOTDIR),
            None => errno(libc::ENOENT),
        }
    }

    fn symlink(&self, link: &Path, target: &Path) -> FuseResult<()> {
        self.insert_new(link, Node::new(Kind::Symlink(target.to_path_buf()), 0o777))
    }

    fn rename(&self, from: &Path, to: &Path, _flags: u32) -> FuseResult<()> {
        self.parent_is_dir(to)?;
        let mut nodes = self.nodes.write();
        let node = nodes.remove(from).ok_or(FuseError::Errno(libc::ENOENT))?;
        let moved: Vec<_> = nodes
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(n), Ok(rest)) = (nodes.remove(&old), old.strip_prefix(from)) {
                nodes.insert(to.join(rest), n);
            }
        }
        nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    fn chmod(&self, path: Option<&Path>, mode: u32, fh: Option<FileHandle>) -> FuseResult<()> {
        let path = self.path_for(path, fh.unwrap_or_default())?;
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&path).ok_or(FuseError::Errno(libc::ENOENT))?;
        node.mode = mode & 0o7777;
        Ok(())
    }

    fn chown(
        &self,
        path: Option<&Path>,
        uid: Option<u32>,
        gid: Option<u32>,
        fh: Option<FileHandle>,
    ) -> FuseResult<()> {
        let path = self.path_for(path, fh.unwrap_or_default())?;
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&path).ok_or(FuseError::Errno(libc::ENOENT))?;
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        Ok(())
    }

    fn truncate(&self, path: Option<&Path>, size: i64, fh: Option<FileHandle>) -> FuseResult<()> {
        let path = self.path_for(path, fh.unwrap_or_default())?;
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&path).map(|n| &mut n.kind) {
            Some(Kind::File(data)) => {
                data.resize(usize::try_from(size).map_err(|_| FuseError::Errno(libc::EINVAL))?, 0);
                Ok(())
            }
            Some(_) => errno(libc::EISDIR),
            None => errno(libc::ENOENT),
        }
    }

    fn utimens(
        &self,
        path: Option<&Path>,
        times: Option<(Timespec, Timespec)>,
        fh: Option<FileHandle>,
    ) -> FuseResult<()> {
        let path = self.path_for(path, fh.unwrap_or_default())?;
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&path).ok_or(FuseError::Errno(libc::ENOENT))?;
        match times {
            None => node.mtime = Timespec::from(std::time::SystemTime::now()),
            Some((_, mtime)) if mtime.is_omit() => {}
            Some((_, mtime)) if mtime.is_now() => {
                node.mtime = Timespec::from(std::time::SystemTime::now());
            }
            Some((_, mtime)) => node.mtime = mtime,
        }
        Ok(())
    }

    fn open(&self, path: &Path, _flags: i32) -> FuseResult<FileHandle> {
        match self.nodes.read().get(path).map(|n| &n.kind) {
            Some(Kind::File(_)) => Ok(FileHandle(self.open.insert(path.to_path_buf()))),
            Some(_) => errno(libc::EISDIR),
            None => errno(libc::ENOENT),
        }
    }

    fn create(&self, path: &Path, mode: u32, _flags: i32) -> FuseResult<FileHandle> {
        self.insert_new(path, Node::new(Kind::File(Vec::new()), mode & 0o7777))?;
        Ok(FileHandle(self.open.insert(path.to_path_buf())))
    }

    fn read(
        &self,
        path: Option<&Path>,
        buf: &mut [u8],
        offset: i64,
        fh: FileHandle,
    ) -> FuseResult<usize> {
        let path = self.path_for(path, fh)?;
        let nodes = self.nodes.read();
        let Some(Kind::File(data)) = nodes.get(&path).map(|n| &n.kind) else {
            return errno(libc::ENOENT);
        };
        let start = usize::try_from(offset).unwrap_or(0).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(
        &self,
        path: Option<&Path>,
        data: &[u8],
        offset: i64,
        fh: FileHandle,
    ) -> FuseResult<usize> {
        let path = self.path_for(path, fh)?;
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get_mut(&path) else {
            return errno(libc::ENOENT);
        };
        let Kind::File(contents) = &mut node.kind else {
            return errno(libc::EISDIR);
        };
        let start = usize::try_from(offset).map_err(|_| FuseError::Errno(libc::EINVAL))?;
        if contents.len() < start + data.len() {
            contents.resize(start + data.len(), 0);
        }
        contents[start..start + data.len()].copy_from_slice(data);
        node.mtime = Timespec::from(std::time::SystemTime::now());
        Ok(data.len())
    }

    fn release(&self, _path: Option<&Path>, fh: FileHandle) -> FuseResult<()> {
        self.open.remove(fh.0);
        Ok(())
    }

    fn setxattr(
        &self,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
    ) -> FuseResult<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(path).ok_or(FuseError::Errno(libc::ENOENT))?;
        node.xattrs.insert(name.to_owned(), value.to_vec());
        Ok(())
    }

    fn getxattr(&self, path: &Path, name: &OsStr, _position: u32) -> FuseResult<Vec<u8>> {
        let nodes = self.nodes.read();
        let node = nodes.get(path).ok_or(FuseError::Errno(libc::ENOENT))?;
        node.xattrs.get(name).cloned().ok_or(FuseError::Errno(no_attr()))
    }

    fn listxattr(&self, path: &Path) -> FuseResult<Vec<OsString>> {
        let nodes = self.nodes.read();
        let node = nodes.get(path).ok_or(FuseError::Errno(libc::ENOENT))?;
        Ok(node.xattrs.keys().cloned().collect())
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> FuseResult<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(path).ok_or(FuseError::Errno(libc::ENOENT))?;
        node.xattrs
            .remove(name)
            .map(drop)
            .ok_or(FuseError::Errno(no_attr()))
    }

    fn readdir(&self, path: Option<&Path>, _fh: FileHandle) -> FuseResult<Vec<DirEntry>> {
        let path = path.ok_or(FuseError::Errno(libc::EBADF))?;
        let mut entries = vec![DirEntry::from("."), DirEntry::from("..")];
        entries.extend(
            self.children(path)
                .into_iter()
                .map(|(name, st)| DirEntry::new(name).with_attr(st)),
        );
        Ok(entries)
    }

    fn supports(&self, primitive: Primitive) -> bool {
        primitive == Primitive::Create || !primitive.is_opt_in()
    }
}

#[cfg(target_os = "linux")]
fn no_attr() -> i32 {
    libc::ENODATA
}

#[cfg(not(target_os = "linux"))]
fn no_attr() -> i32 {
    libc::ENOATTR
}
