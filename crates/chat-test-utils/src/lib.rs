// chat-test-utils: Shared test utilities for the chat relay suites.
//
// Provides a WebSocket client that speaks `ChatMessage` frames so service and
// end-to-end tests can drive the relay over a real socket.

pub mod mock_ws_client;

pub use mock_ws_client::{ClientError, MockWsClient};
