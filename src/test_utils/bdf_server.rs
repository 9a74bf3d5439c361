//! An in-memory BDF server.

use crate::bdf::{BdfServer, Consumer};
use crate::core::LkgError;
use crate::test_utils::BdfFixture;
use crate::version::Version;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Serves BDF documents and consumer lists registered by the test.
///
/// Wildcard requests return the newest matching document. While offline every
/// call fails with a transport error.
#[derive(Debug, Default)]
pub struct FakeBdfServer {
    bdfs: Mutex<Vec<(String, Version, String)>>,
    consumers: Mutex<Vec<(String, Version, Consumer)>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
    consumer_queries: AtomicUsize,
}

impl FakeBdfServer {
    /// A server with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a BDF.
    ///
    /// # Panics
    ///
    /// When the fixture version does not parse.
    pub fn add_bdf(&self, fixture: BdfFixture) {
        let version = Version::parse(fixture.version()).expect("fixture version parses");
        if let Ok(mut bdfs) = self.bdfs.lock() {
            bdfs.push((fixture.product().to_string(), version, fixture.to_xml()));
        }
    }

    /// Registers raw document text, well-formed or not.
    pub fn add_raw(&self, product: &str, version: Version, xml: &str) {
        if let Ok(mut bdfs) = self.bdfs.lock() {
            bdfs.push((product.to_string(), version, xml.to_string()));
        }
    }

    /// Records that `consumer` at `consumer_version` pulled `sub_part` at `version`.
    pub fn add_consumer(&self, sub_part: &str, version: Version, consumer: &str, consumer_version: Version) {
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.push((
                sub_part.to_string(),
                version,
                Consumer {
                    name: consumer.to_string(),
                    version: consumer_version,
                },
            ));
        }
    }

    /// Takes the server on- or offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of BDF fetches served or refused.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of consumer queries served or refused.
    pub fn consumer_query_count(&self) -> usize {
        self.consumer_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BdfServer for FakeBdfServer {
    async fn fetch_bdf(&self, product: &str, version: &Version) -> Result<Option<String>, LkgError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(LkgError::transport(format!("fetch BDF {product} {version}"), "connection refused"));
        }
        let bdfs = self.bdfs.lock().map_err(LkgError::other)?;
        Ok(bdfs
            .iter()
            .filter(|(p, v, _)| p.eq_ignore_ascii_case(product) && version.matches(v))
            .max_by_key(|(_, v, _)| *v)
            .map(|(_, _, xml)| xml.clone()))
    }

    async fn consumers(&self, sub_part: &str, version: &Version) -> Result<Vec<Consumer>, LkgError> {
        self.consumer_queries.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(LkgError::transport(format!("consumers of {sub_part} {version}"), "connection refused"));
        }
        let consumers = self.consumers.lock().map_err(LkgError::other)?;
        Ok(consumers
            .iter()
            .filter(|(p, v, _)| p.eq_ignore_ascii_case(sub_part) && v == version)
            .map(|(_, _, c)| c.clone())
            .collect())
    }
}
