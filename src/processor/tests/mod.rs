//! Integration tests for the processor module
//!
//! Exercises the whole pipeline on small trip files written to temp dirs.
