// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Training inputs: the document corpus and the user-document rating graph.
mod corpus;
mod ratings;

pub use corpus::{Corpus, Document};
pub use ratings::RatingGraph;
