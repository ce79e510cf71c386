use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};

use crate::core::{AccessKey, DocumentType, FiscalError, TenantId};

use super::ports::ArtifactStore;

/// Deterministic artifact paths of one document, relative to the store root:
/// `{tenant}/{kind}/{yyyy}/{mm}/{access_key}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub xml: PathBuf,
    pub signed_xml: PathBuf,
    pub authorized_xml: PathBuf,
    pub printable: PathBuf,
}

impl ArtifactPaths {
    pub fn new(
        tenant: TenantId,
        document_type: DocumentType,
        issue_date: NaiveDate,
        access_key: &AccessKey,
    ) -> Self {
        let dir = PathBuf::from(tenant.to_string())
            .join(kind_directory(document_type))
            .join(format!("{:04}", issue_date.year()))
            .join(format!("{:02}", issue_date.month()));
        let key = access_key.as_str();
        Self {
            xml: dir.join(format!("{key}.xml")),
            signed_xml: dir.join(format!("{key}-signed.xml")),
            authorized_xml: dir.join(format!("{key}-authorized.xml")),
            printable: dir.join(format!("{key}.pdf")),
        }
    }
}

fn kind_directory(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Invoice => "invoices",
        DocumentType::CreditNote => "credit-notes",
        DocumentType::DebitNote => "debit-notes",
        DocumentType::Retention => "retentions",
    }
}

/// Artifact store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative artifact path. Absolute paths and
    /// `..` components are refused.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, FiscalError> {
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FiscalError::Storage(format!(
                "artifact path {} escapes the store",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }
}

/// `k.xml` -> `k.xml.partial`, so artifacts sharing a stem get distinct
/// temporary files.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, path: &Path, bytes: &[u8]) -> Result<(), FiscalError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                FiscalError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        // Write to a sibling and rename, so readers never see half a file.
        let tmp = partial_path(&target);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| FiscalError::Storage(format!("cannot write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| FiscalError::Storage(format!("cannot write {}: {e}", target.display())))?;
        tracing::debug!(path = %target.display(), bytes = bytes.len(), "artifact stored");
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>, FiscalError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FiscalError::Precondition(
                format!("artifact {} does not exist", path.display()),
            )),
            Err(e) => Err(FiscalError::Storage(format!(
                "cannot read {}: {e}",
                target.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccessKeyFields, EmissionPointCode, Environment, EstablishmentCode};

    fn key() -> AccessKey {
        AccessKey::generate(&AccessKeyFields::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            DocumentType::CreditNote,
            "0912345678001",
            Environment::Test,
            EstablishmentCode::new(1).unwrap(),
            EmissionPointCode::new(2).unwrap(),
            7,
        ))
        .unwrap()
    }

    #[test]
    fn paths_are_partitioned_by_tenant_kind_and_month() {
        let tenant = TenantId::new();
        let key = key();
        let paths = ArtifactPaths::new(
            tenant,
            DocumentType::CreditNote,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            &key,
        );
        let dir = PathBuf::from(tenant.to_string()).join("credit-notes/2024/03");
        assert_eq!(paths.xml, dir.join(format!("{}.xml", key.as_str())));
        assert_eq!(paths.signed_xml, dir.join(format!("{}-signed.xml", key.as_str())));
        assert_eq!(paths.authorized_xml, dir.join(format!("{}-authorized.xml", key.as_str())));
        assert_eq!(paths.printable, dir.join(format!("{}.pdf", key.as_str())));
    }

    #[test]
    fn escaping_paths_are_refused() {
        let store = FsArtifactStore::new("/srv/artifacts");
        assert!(store.resolve(Path::new("../etc/passwd")).is_err());
        assert!(store.resolve(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            store.resolve(Path::new("a/b.xml")).unwrap(),
            PathBuf::from("/srv/artifacts/a/b.xml")
        );
    }

    #[test]
    fn temporary_names_keep_the_full_file_name() {
        let dir = Path::new("t/invoices/2024/03");
        assert_eq!(partial_path(&dir.join("k.xml")), dir.join("k.xml.partial"));
        assert_eq!(partial_path(&dir.join("k.pdf")), dir.join("k.pdf.partial"));
        assert_ne!(
            partial_path(&dir.join("k.xml")),
            partial_path(&dir.join("k.pdf"))
        );
    }

    #[tokio::test]
    async fn sibling_artifacts_written_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let xml = Path::new("t/invoices/2024/03/k.xml");
        let pdf = Path::new("t/invoices/2024/03/k.pdf");
        let (a, b) = tokio::join!(store.put(xml, b"<factura/>"), store.put(pdf, b"%PDF"));
        a.unwrap();
        b.unwrap();
        assert_eq!(store.get(xml).await.unwrap(), b"<factura/>");
        assert_eq!(store.get(pdf).await.unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let path = Path::new("t/invoices/2024/03/k.xml");
        store.put(path, b"<factura/>").await.unwrap();
        assert_eq!(store.get(path).await.unwrap(), b"<factura/>");
        let missing = store.get(Path::new("t/none.xml")).await.unwrap_err();
        assert!(missing.is_precondition());
    }
}
