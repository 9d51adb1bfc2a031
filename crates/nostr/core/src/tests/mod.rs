//! Cross-module tests for the event model and the signer.
