//! Address-centric secondary indices for a UTXO chain: a per-address delta
//! log, a spent-output index, a transient mempool mirror, and the read-only
//! query surface over them. Index mutation follows block connects and
//! disconnects one-for-one, so a reorganization is nothing more than a
//! sequence of exact inverse steps.

pub mod deltas;
pub mod indexer;
pub mod mempool;
pub mod query;
pub mod spentindex;

pub use deltas::{AddressDelta, AddressDeltaStore};
pub use indexer::{ChainIndexer, IndexError, IndexTip, SpentOutput};
pub use mempool::{MempoolAddressIndex, MempoolDelta};
pub use query::{AddressQuery, QueryEngine, QueryError};
pub use spentindex::{SpentDetails, SpentEntry, SpentIndexStore};
