use llama_engine::{Batch, ExecutionContext, RuntimeError, SeqId, TokenId};

/// Default number of tokens submitted per decode call.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// A chunk of a feed was rejected by the execution context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decode of chunk {chunk} starting at position {position} failed: {source}")]
pub struct FeedError {
    /// Zero-based index of the failing chunk.
    pub chunk: usize,
    /// Absolute position of the chunk's first token.
    pub position: usize,
    pub source: RuntimeError,
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// Submits token runs to an execution context in bounded chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchFeeder {
    chunk_size: usize,
    seq_id: SeqId,
}

impl Default for BatchFeeder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, 0)
    }
}

impl BatchFeeder {
    /// A `chunk_size` of 0 is treated as 1.
    pub fn new(chunk_size: usize, seq_id: SeqId) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            seq_id,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn seq_id(&self) -> SeqId {
        self.seq_id
    }

    /// Feed `tokens` at positions `start..start + tokens.len()`.
    ///
    /// Only the last token of the whole run may request logits. Chunks are decoded
    /// in order and the first failure aborts the feed; chunks before it remain in
    /// the window, so callers must not commit history on error.
    pub fn feed<C>(
        &self,
        ctx: &mut C,
        tokens: &[TokenId],
        start: usize,
        logits_on_last: bool,
    ) -> FeedResult<()>
    where
        C: ExecutionContext + ?Sized,
    {
        if tokens.is_empty() {
            return Ok(());
        }

        let last = tokens.len() - 1;
        let mut batch = Batch::with_capacity(self.chunk_size.min(tokens.len()));

        for (chunk, run) in tokens.chunks(self.chunk_size).enumerate() {
            let offset = chunk * self.chunk_size;
            batch.clear();
            for (i, &token) in run.iter().enumerate() {
                let idx = offset + i;
                batch.push(token, start + idx, self.seq_id, logits_on_last && idx == last);
            }

            tracing::debug!(chunk, position = start + offset, len = run.len(), "feeding chunk");
            ctx.decode(&batch).map_err(|source| FeedError {
                chunk,
                position: start + offset,
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_engine::Result;

    #[derive(Default)]
    struct Recorder {
        batches: Vec<Batch>,
        fail_on: Option<usize>,
    }

    impl ExecutionContext for Recorder {
        fn decode(&mut self, batch: &Batch) -> Result<()> {
            if self.fail_on == Some(self.batches.len()) {
                self.batches.push(batch.clone());
                return Err(RuntimeError::decode(1, "full"));
            }
            self.batches.push(batch.clone());
            Ok(())
        }

        fn last_logits(&self) -> Option<&[f32]> {
            None
        }

        fn window_capacity(&self) -> usize {
            usize::MAX
        }

        fn clear_window(&mut self) {}
    }

    #[test]
    fn zero_chunk_size_becomes_one() {
        assert_eq!(BatchFeeder::new(0, 0).chunk_size(), 1);
    }

    #[test]
    fn empty_feed_is_noop() {
        let mut ctx = Recorder::default();
        BatchFeeder::default().feed(&mut ctx, &[], 5, true).unwrap();
        assert!(ctx.batches.is_empty());
    }

    #[test]
    fn splits_into_chunks_with_contiguous_positions() {
        let mut ctx = Recorder::default();
        let tokens: Vec<TokenId> = (100..107).collect();
        BatchFeeder::new(3, 2).feed(&mut ctx, &tokens, 10, true).unwrap();

        let sizes: Vec<usize> = ctx.batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let positions: Vec<usize> = ctx
            .batches
            .iter()
            .flat_map(|b| b.positions().to_vec())
            .collect();
        assert_eq!(positions, (10..17).collect::<Vec<_>>());
        assert!(ctx.batches.iter().all(|b| b.seq_ids().iter().all(|&s| s == 2)));
    }

    #[test]
    fn logits_only_on_global_last() {
        let mut ctx = Recorder::default();
        BatchFeeder::new(2, 0)
            .feed(&mut ctx, &[1, 2, 3, 4], 0, true)
            .unwrap();
        let flags: Vec<bool> = ctx
            .batches
            .iter()
            .flat_map(|b| b.logits().to_vec())
            .collect();
        assert_eq!(flags, vec![false, false, false, true]);
    }

    #[test]
    fn no_logits_when_not_requested() {
        let mut ctx = Recorder::default();
        BatchFeeder::new(2, 0)
            .feed(&mut ctx, &[1, 2, 3], 0, false)
            .unwrap();
        assert!(ctx.batches.iter().all(|b| b.last_logits_index().is_none()));
    }

    #[test]
    fn aborts_on_first_failing_chunk() {
        let mut ctx = Recorder {
            fail_on: Some(1),
            ..Default::default()
        };
        let err = BatchFeeder::new(2, 0)
            .feed(&mut ctx, &[1, 2, 3, 4, 5], 7, true)
            .unwrap_err();
        assert_eq!(err.chunk, 1);
        assert_eq!(err.position, 9);
        assert_eq!(ctx.batches.len(), 2);
    }
}
