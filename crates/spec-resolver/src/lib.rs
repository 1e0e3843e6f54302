// Copyright 2026 Spec Resolver Contributors
// SPDX-License-Identifier: Apache-2.0

//! Spec resolver: turn a specification URL or raw markup into one fully
//! rendered document tagged with the tool that generated it.
//!
//! The pipeline fetches the source, renders it in an isolated session
//! (running ReSpec where the document uses it), classifies the generator,
//! and follows meta-refresh and single-page redirects a bounded number of
//! times. See [`Resolver`] and [`resolve_specification`].

pub mod config;
pub mod detect;
pub mod document;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod redirect;
pub mod renderer;
pub mod resolver;

pub use config::Config;
pub use detect::Generator;
pub use document::SpecDocument;
pub use error::{ResolveError, Result};
pub use fetcher::{FetchOptions, FetchResult, Fetcher, HttpFetcher, Refresh};
pub use resolver::{resolve_specification, ResolvedDocument, Resolver, ResolverBuilder, SpecRequest};
