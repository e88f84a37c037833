//! `statvfs(3)` based free-space probe.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::HarnessError;
use crate::ports::DiskProbe;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, HarnessError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| HarnessError::Config(format!("path contains a NUL byte: {}", path.display())))?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let stat = unsafe { stat.assume_init() };
        // 一般ユーザーが使える分だけ（f_bfree ではない）
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}
