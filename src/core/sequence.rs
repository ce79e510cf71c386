use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use super::codes::DocumentType;
use super::error::FiscalError;
use super::establishment::{
    EmissionPoint, EmissionPointCode, EmissionPointId, Establishment, EstablishmentCode,
    EstablishmentId, MAX_SEQUENTIAL, TenantId,
};

/// Emission point row: the point itself plus one counter per document type.
///
/// A counter holds the next sequential to hand out, starting at 1.
#[derive(Debug)]
struct PointRow {
    tenant: TenantId,
    point: EmissionPoint,
    counters: [AtomicU32; 4],
}

impl PointRow {
    fn counter(&self, document_type: DocumentType) -> &AtomicU32 {
        &self.counters[document_type.counter_slot()]
    }
}

/// Establishment and emission point resolved for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmissionPointContext {
    pub establishment: Establishment,
    pub emission_point: EmissionPoint,
}

/// Arena of establishments and emission points with per-point sequential
/// counters.
///
/// Rows are addressed by index ([`EstablishmentId`], [`EmissionPointId`]).
/// Allocation takes the arena's read lock and advances the row's counter with
/// a compare-and-set loop, so allocations on different points (or different
/// document types of one point) never wait on each other, while concurrent
/// allocations on the same counter are serialized by the CAS.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    establishments: RwLock<Vec<Establishment>>,
    points: RwLock<Vec<PointRow>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an establishment. Codes are unique per tenant.
    pub fn add_establishment(
        &self,
        tenant: TenantId,
        code: EstablishmentCode,
        address: impl Into<String>,
    ) -> Result<EstablishmentId, FiscalError> {
        let mut rows = self.establishments.write();
        if rows.iter().any(|e| e.tenant == tenant && e.code == code) {
            return Err(FiscalError::Validation(format!(
                "establishment {code} already exists for tenant {tenant}"
            )));
        }
        let id = EstablishmentId(rows.len());
        rows.push(Establishment {
            id,
            tenant,
            code,
            address: address.into(),
        });
        Ok(id)
    }

    /// Register an emission point under an establishment of the same tenant.
    pub fn add_emission_point(
        &self,
        tenant: TenantId,
        establishment: EstablishmentId,
        code: EmissionPointCode,
    ) -> Result<EmissionPointId, FiscalError> {
        self.establishment(tenant, establishment)?;
        let mut rows = self.points.write();
        if rows
            .iter()
            .any(|r| r.point.establishment == establishment && r.point.code == code)
        {
            return Err(FiscalError::Validation(format!(
                "emission point {code} already exists in establishment {}",
                establishment.0
            )));
        }
        let id = EmissionPointId(rows.len());
        rows.push(PointRow {
            tenant,
            point: EmissionPoint {
                id,
                establishment,
                code,
            },
            counters: std::array::from_fn(|_| AtomicU32::new(1)),
        });
        Ok(id)
    }

    /// Look up an establishment owned by `tenant`.
    pub fn establishment(
        &self,
        tenant: TenantId,
        id: EstablishmentId,
    ) -> Result<Establishment, FiscalError> {
        self.establishments
            .read()
            .get(id.0)
            .filter(|e| e.tenant == tenant)
            .cloned()
            .ok_or_else(|| FiscalError::NotFound(format!("establishment {}", id.0)))
    }

    /// Resolve an emission point and its establishment for `tenant`.
    pub fn resolve(
        &self,
        tenant: TenantId,
        point: EmissionPointId,
    ) -> Result<EmissionPointContext, FiscalError> {
        let emission_point = self
            .points
            .read()
            .get(point.0)
            .filter(|r| r.tenant == tenant)
            .map(|r| r.point.clone())
            .ok_or_else(|| FiscalError::NotFound(format!("emission point {}", point.0)))?;
        let establishment = self.establishment(tenant, emission_point.establishment)?;
        Ok(EmissionPointContext {
            establishment,
            emission_point,
        })
    }

    /// Hand out the next sequential for `document_type` on `point`.
    ///
    /// Each successful call consumes exactly one number; the counter is never
    /// rolled back, even if the caller later fails.
    pub fn allocate(
        &self,
        point: EmissionPointId,
        document_type: DocumentType,
    ) -> Result<u32, FiscalError> {
        let rows = self.points.read();
        let row = rows
            .get(point.0)
            .ok_or_else(|| FiscalError::NotFound(format!("emission point {}", point.0)))?;
        row.counter(document_type)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next <= MAX_SEQUENTIAL).then_some(next + 1)
            })
            .map_err(|_| {
                FiscalError::Numbering(format!(
                    "sequence for document type {} on emission point {} is exhausted",
                    document_type.code(),
                    row.point.code
                ))
            })
    }

    /// The sequential the next [`allocate`](Self::allocate) would return,
    /// without consuming it.
    pub fn current(
        &self,
        point: EmissionPointId,
        document_type: DocumentType,
    ) -> Result<u32, FiscalError> {
        let rows = self.points.read();
        let row = rows
            .get(point.0)
            .ok_or_else(|| FiscalError::NotFound(format!("emission point {}", point.0)))?;
        Ok(row.counter(document_type).load(Ordering::Acquire))
    }

    /// Move a counter forward, e.g. when taking over numbering from a previous
    /// system. Counters never move backwards.
    pub fn seed(
        &self,
        point: EmissionPointId,
        document_type: DocumentType,
        next: u32,
    ) -> Result<(), FiscalError> {
        if next == 0 || next > MAX_SEQUENTIAL {
            return Err(FiscalError::Numbering(format!(
                "next sequential {next} out of range 1..={MAX_SEQUENTIAL}"
            )));
        }
        let rows = self.points.read();
        let row = rows
            .get(point.0)
            .ok_or_else(|| FiscalError::NotFound(format!("emission point {}", point.0)))?;
        row.counter(document_type)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next >= current).then_some(next)
            })
            .map(|_| ())
            .map_err(|current| {
                FiscalError::Numbering(format!(
                    "cannot move sequence back from {current} to {next}"
                ))
            })
    }
}
