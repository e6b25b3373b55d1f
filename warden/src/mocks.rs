use std::path::PathBuf;

use mockall::mock;

use crate::forensic::{Inspector, ProcessInfo};
use crate::respond::{Signal, Signaller};
use crate::Result;

mock! {
    pub Signals {}
    trait Signaller {
        fn send(&self, pid: u32, signal: Signal) -> Result<()>;
    }
}

mock! {
    pub Procs {}
    trait Inspector {
        fn exists(&self, pid: u32) -> bool;
        fn uid(&self, pid: u32) -> Option<u32>;
        fn gather(&self, pid: u32) -> ProcessInfo;
        fn fd_target(&self, pid: u32, fd: i32) -> Option<PathBuf>;
    }
}
