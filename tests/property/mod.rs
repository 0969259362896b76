// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module

mod cache_properties;
mod handler_properties;
