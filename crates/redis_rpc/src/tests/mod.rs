use super::*;

use serde_json::{json, Value};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::time;
use tokio_util::sync::CancellationToken;

mod support;
use support::*;

mod envelope;
