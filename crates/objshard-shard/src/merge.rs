//! K-way merge of independently ordered listing streams.
//!
//! The frontier holds at most one pending head per input. The smallest head
//! is emitted, and the next object from the same input takes its place, so
//! the output is globally ordered as long as every input is.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use objshard_store::{ListItem, ObjectInfo, ObjectSender, ObjectStream, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A pending head of one input stream.
#[derive(Debug)]
struct Head {
    obj: ObjectInfo,
    input: usize,
}

// Ties between equal keys are broken by input index, which keeps the merged
// order deterministic when two shards hold the same key.
impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.obj
            .key
            .cmp(&other.obj.key)
            .then_with(|| self.input.cmp(&other.input))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

enum Pulled {
    Item(ObjectInfo),
    Exhausted,
    Failed(StoreError),
    Cancelled,
}

async fn pull(stream: &mut ObjectStream, cancel: &CancellationToken) -> Pulled {
    let item: Option<ListItem> = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Pulled::Cancelled,
        item = stream.next() => item,
    };
    match item {
        Some(Ok(obj)) => Pulled::Item(obj),
        Some(Err(e)) => Pulled::Failed(e),
        None => Pulled::Exhausted,
    }
}

/// Merge `inputs` into one stream ordered by key.
///
/// Inputs are consumed concurrently with their producers. Equal keys from
/// different inputs are all emitted. An error from input `i` is forwarded as
/// `StoreError::Shard { index: i, .. }` and ends the merge. Dropping the
/// returned stream abandons every input; cancelling `cancel` does too, and
/// the stream then ends with `StoreError::Cancelled`.
pub fn merge_streams(
    inputs: Vec<ObjectStream>,
    capacity: usize,
    cancel: CancellationToken,
) -> ObjectStream {
    let (tx, stream) = ObjectStream::channel(capacity, cancel);
    tokio::spawn(run_merge(inputs, tx));
    stream
}

async fn run_merge(mut inputs: Vec<ObjectStream>, tx: ObjectSender) {
    let cancel = tx.token().clone();
    let mut frontier: BinaryHeap<Reverse<Head>> = BinaryHeap::with_capacity(inputs.len());

    for (input, stream) in inputs.iter_mut().enumerate() {
        match pull(stream, &cancel).await {
            Pulled::Item(obj) => frontier.push(Reverse(Head { obj, input })),
            Pulled::Exhausted => debug!(input, "input is empty"),
            Pulled::Failed(e) => return fail(&tx, input, e).await,
            Pulled::Cancelled => return tx.finish_cancelled().await,
        }
    }

    let mut emitted = 0u64;
    while let Some(Reverse(Head { obj, input })) = frontier.pop() {
        if !tx.send(Ok(obj)).await {
            debug!(emitted, "merge abandoned");
            return tx.finish_cancelled().await;
        }
        emitted += 1;
        match pull(&mut inputs[input], &cancel).await {
            Pulled::Item(obj) => frontier.push(Reverse(Head { obj, input })),
            Pulled::Exhausted => debug!(input, "input retired"),
            Pulled::Failed(e) => return fail(&tx, input, e).await,
            Pulled::Cancelled => return tx.finish_cancelled().await,
        }
    }
    debug!(emitted, "merge complete");
}

/// End the merge with an input's error. A cancelled input means the whole
/// listing was cancelled, which is not a fault of that shard.
async fn fail(tx: &ObjectSender, input: usize, e: StoreError) {
    match e {
        StoreError::Cancelled => tx.finish_cancelled().await,
        e => {
            tx.send(Err(e.in_shard(input))).await;
        }
    }
}
