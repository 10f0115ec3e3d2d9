//! Trust Material Store: an on-disk cache of TRCs and certificate
//! chains, addressed by `(isd, ad, version)`. Writes are atomic (write to a
//! temp file, then rename) so a crash mid-write never leaves a partial
//! file behind.

use std::path::PathBuf;

use crate::error::TrustStoreError;
use crate::pcb::IsdAs;

pub struct TrustStore {
    root: PathBuf,
}

impl TrustStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn trc_path(&self, local: IsdAs, target_isd: u16, version: u32) -> PathBuf {
        self.root
            .join(format!("{}-{}", local.isd_id, local.ad_id))
            .join("trc")
            .join(format!("isd{target_isd}-v{version}.json"))
    }

    fn cert_path(&self, local: IsdAs, target: IsdAs, version: u32) -> PathBuf {
        self.root
            .join(format!("{}-{}", local.isd_id, local.ad_id))
            .join("certs")
            .join(format!("isd{}-ad{}-v{version}.json", target.isd_id, target.ad_id))
    }

    pub fn has_trc(&self, local: IsdAs, target_isd: u16, version: u32) -> bool {
        self.trc_path(local, target_isd, version).is_file()
    }

    pub fn has_cert(&self, local: IsdAs, target: IsdAs, version: u32) -> bool {
        self.cert_path(local, target, version).is_file()
    }

    pub fn load_trc(&self, local: IsdAs, target_isd: u16, version: u32) -> Result<Vec<u8>, TrustStoreError> {
        Ok(std::fs::read(self.trc_path(local, target_isd, version))?)
    }

    pub fn load_cert(&self, local: IsdAs, target: IsdAs, version: u32) -> Result<Vec<u8>, TrustStoreError> {
        Ok(std::fs::read(self.cert_path(local, target, version))?)
    }

    pub fn store_trc(&self, local: IsdAs, target_isd: u16, version: u32, bytes: &[u8]) -> Result<(), TrustStoreError> {
        let path = self.trc_path(local, target_isd, version);
        atomic_write(&path, bytes)
    }

    pub fn store_cert(
        &self,
        local: IsdAs,
        target: IsdAs,
        version: u32,
        bytes: &[u8],
    ) -> Result<(), TrustStoreError> {
        let path = self.cert_path(local, target, version);
        atomic_write(&path, bytes)
    }
}

fn atomic_write(path: &std::path::Path, bytes: &[u8]) -> Result<(), TrustStoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
