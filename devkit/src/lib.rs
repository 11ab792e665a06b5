/*!
# termhub DevKit - Mocks et utilitaires de test pour la télémétrie

Bibliothèque facilitant le test du transport de télémétrie avec:
- Connecteur WebSocket simulé (pas d'agent réel)
- Builders d'échantillons et de pongs
- Listener enregistreur et harness de scénarios
*/

pub mod frame_helpers;
pub mod test_utils;
pub mod ws_stub;

pub use frame_helpers::{legacy_pong, pong_for, SampleBuilder};
pub use test_utils::{init_test_logging, RecordedEvent, RecordingListener, TestHarness};
pub use ws_stub::{MockConnector, MockServer, Outcome, RecordedRequest};
