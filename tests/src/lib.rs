//! Integration tests for the `stream-playback` workspace live under `tests/tests/`.
