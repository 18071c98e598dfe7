//! Integration Tests Module
//!
//! End-to-end tests for the question graph, the SQLite gateway and the batch
//! runner. Model-backed steps are replaced by scripted stubs.

// Scripted steps, gateway and corpus shared by the tests below
mod support;

// Graph scenarios: routing, repairs, budgets, fatal failures
mod graph_scenarios_test;

// Real SQLite store behind the graph
mod gateway_test;

// JSONL batch runs
mod batch_test;
