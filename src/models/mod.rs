//! Core data models for the image store.
//!
//! `ObjectMetadata` is what the object index persists; the bytes it
//! describes are held by the chunk store.

pub mod object;
