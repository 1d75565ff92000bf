// SPDX-License-Identifier: Apache-2.0

pub(crate) mod artifacts;
pub(crate) mod auth;
pub(crate) mod dashboard;
pub(crate) mod events;
pub(crate) mod handlers;
pub(crate) mod reports;
pub(crate) mod request_tracing;
pub(crate) mod response_contract;
