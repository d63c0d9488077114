//! End-to-end tests for the processor over real pipelines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seqserve_core::compose::{BatchSettings, BatchStrategy, NaiveComposer, TimeoutComposer};
use seqserve_core::error::StageError;
use seqserve_core::model::{EchoModel, ModelError, SequenceModel};
use seqserve_core::stage::{Stage, StageIo, Step};
use seqserve_core::task::{Item, Payload};
use seqserve_core::{PipelineHealth, ProcessError, Processor, ProcessorConfig};
use tokio::time::Instant;

/// Reverses every row, padding included.
struct Reverse;

#[async_trait]
impl SequenceModel for Reverse {
    fn name(&self) -> &str {
        "reverse"
    }

    async fn process(&self, batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError> {
        Ok(batch
            .into_iter()
            .map(|mut row| {
                row.reverse();
                row
            })
            .collect())
    }
}

/// Echoes and remembers the `(rows, width)` shape of every batch.
#[derive(Default)]
struct Recording {
    shapes: Mutex<Vec<(usize, usize)>>,
}

impl Recording {
    fn shapes(&self) -> Vec<(usize, usize)> {
        self.shapes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SequenceModel for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn process(&self, batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError> {
        let width = batch.first().map(Vec::len).unwrap_or(0);
        self.shapes.lock().unwrap().push((batch.len(), width));
        Ok(batch)
    }
}

struct Broken;

#[async_trait]
impl SequenceModel for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn process(&self, _batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError> {
        Err(ModelError::Inference("out of memory".to_string()))
    }
}

/// Upper-cases ASCII letters on token payloads.
struct Shout;

#[async_trait]
impl Stage for Shout {
    fn name(&self) -> &'static str {
        "shout"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(mut task) = io.recv_task().await? else {
            return Ok(Step::Finished);
        };
        if let Payload::Tokens(tokens) = &mut task.payload {
            for token in tokens.iter_mut() {
                if (b'a' as i32..=b'z' as i32).contains(token) {
                    *token -= 32;
                }
            }
        }
        io.send(Item::Task(task)).await?;
        Ok(Step::Continue)
    }
}

fn cost_composer(batch_size: usize, wait: Duration, parallel_size: usize) -> Box<dyn Stage> {
    BatchSettings {
        strategy: BatchStrategy::CostBased,
        batch_size,
        wait_timeout: wait,
        parallel_size,
        ..BatchSettings::default()
    }
    .build()
}

async fn started(processor: Processor) -> Arc<Processor> {
    processor.start().await.unwrap();
    Arc::new(processor)
}

#[tokio::test]
async fn test_round_trip_through_echo_model() {
    let processor = started(
        Processor::for_model(
            cost_composer(8, Duration::from_millis(20), 1000),
            Arc::new(EchoModel::instant()),
            ProcessorConfig::default(),
        )
        .unwrap(),
    )
    .await;

    for query in ["hello", "héllo wörld", "a"] {
        let result = processor.process_query(query, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, query);
    }
    assert_eq!(processor.pending_len().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_results_reach_their_callers() {
    let processor = started(
        Processor::for_model(
            cost_composer(16, Duration::from_millis(50), 200),
            Arc::new(Reverse),
            ProcessorConfig::default(),
        )
        .unwrap(),
    )
    .await;

    let mut handles = Vec::new();
    for i in 0..200 {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            let query = format!("q{}{}", i, "x".repeat(i % 7));
            let result = processor.process_query(&query, Duration::from_secs(10)).await.unwrap();
            let expected: String = query.chars().rev().collect();
            assert_eq!(result, expected);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(processor.pending_len().await, 0);
    assert_eq!(processor.batch_stats().tasks, 200);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_rejects_then_recovers() {
    let config = ProcessorConfig {
        pending_capacity: 2,
        ..ProcessorConfig::default()
    };
    let composer = Box::new(TimeoutComposer::new(10, Duration::from_secs(60), Duration::ZERO));
    let processor = started(
        Processor::for_model(composer, Arc::new(EchoModel::instant()), config).unwrap(),
    )
    .await;

    let mut waiting = Vec::new();
    for query in ["one", "two"] {
        let processor = processor.clone();
        waiting.push(tokio::spawn(async move {
            processor.process_query(query, Duration::from_secs(120)).await
        }));
    }
    while processor.pending_len().await < 2 {
        tokio::task::yield_now().await;
    }

    let err = processor
        .process_query("three", Duration::from_secs(120))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::AdmissionOverflow));
    assert_eq!(processor.pending_len().await, 2);

    for (handle, expected) in waiting.into_iter().zip(["one", "two"]) {
        assert_eq!(handle.await.unwrap().unwrap(), expected);
    }
    assert_eq!(processor.pending_len().await, 0);

    let result = processor.process_query("four", Duration::from_secs(120)).await.unwrap();
    assert_eq!(result, "four");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_frees_its_admission() {
    let config = ProcessorConfig {
        pending_capacity: 1,
        ..ProcessorConfig::default()
    };
    let composer = Box::new(TimeoutComposer::new(10, Duration::from_secs(60), Duration::ZERO));
    let processor = started(
        Processor::for_model(composer, Arc::new(EchoModel::instant()), config).unwrap(),
    )
    .await;

    let err = processor
        .process_query("first", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::RequestTimeout(_)));
    assert_eq!(processor.pending_len().await, 0);

    // the only slot was given back, so the next request is admitted
    let result = processor.process_query("second", Duration::from_secs(120)).await.unwrap();
    assert_eq!(result, "second");
    assert_eq!(processor.pending_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_is_abandoned() {
    let composer = Box::new(TimeoutComposer::new(10, Duration::from_secs(60), Duration::ZERO));
    let processor = started(
        Processor::for_model(composer, Arc::new(EchoModel::instant()), ProcessorConfig::default())
            .unwrap(),
    )
    .await;

    let start = Instant::now();
    let err = processor
        .process_query("slow", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::RequestTimeout(t) if t == Duration::from_secs(1)));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(processor.pending_len().await, 0);

    // the abandoned task leaves in the same batch; its result is dropped
    let result = processor.process_query("late", Duration::from_secs(120)).await.unwrap();
    assert_eq!(result, "late");
    assert_eq!(processor.pending_len().await, 0);
    assert_eq!(processor.batch_stats().tasks, 2);
}

#[tokio::test(start_paused = true)]
async fn test_long_request_not_padded_with_short_ones() {
    let model = Arc::new(Recording::default());
    let processor = started(
        Processor::for_model(
            cost_composer(64, Duration::from_secs(1), 100),
            model.clone(),
            ProcessorConfig::default(),
        )
        .unwrap(),
    )
    .await;

    let mut handles = Vec::new();
    for i in 0..11 {
        let processor = processor.clone();
        let query = if i == 10 { "y".repeat(50) } else { "x".repeat(5) };
        handles.push(tokio::spawn(async move {
            let result = processor.process_query(&query, Duration::from_secs(5)).await.unwrap();
            assert_eq!(result, query);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let shapes = model.shapes();
    assert_eq!(shapes.iter().map(|(rows, _)| rows).sum::<usize>(), 11);
    for (rows, width) in &shapes {
        assert!(rows * width <= 100, "batch of {} x {} over capacity", rows, width);
    }
    assert!(shapes.contains(&(10, 5)), "batches were {:?}", shapes);
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_does_not_wait_for_timeout() {
    let model = Arc::new(Recording::default());
    let processor = started(
        Processor::for_model(
            cost_composer(4, Duration::from_secs(1), 1000),
            model.clone(),
            ProcessorConfig::default(),
        )
        .unwrap(),
    )
    .await;
    let start = Instant::now();

    let mut handles = Vec::new();
    for query in ["abc", "abcd", "abc", "abcd"] {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor.process_query(query, Duration::from_secs(5)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(start.elapsed() < Duration::from_millis(10));
    assert_eq!(model.shapes(), vec![(4, 4)]);
}

#[tokio::test(start_paused = true)]
async fn test_lone_request_answered_by_deadline() {
    let wait = Duration::from_secs(1);
    let processor = started(
        Processor::for_model(
            cost_composer(10, wait, 1000),
            Arc::new(EchoModel::instant()),
            ProcessorConfig::default(),
        )
        .unwrap(),
    )
    .await;
    let start = Instant::now();

    let result = processor.process_query("alone", Duration::from_secs(5)).await.unwrap();

    assert_eq!(result, "alone");
    assert!(start.elapsed() <= wait);
}

#[tokio::test]
async fn test_stage_failure_fails_callers_and_later_requests() {
    let processor = started(
        Processor::for_model(Box::new(NaiveComposer), Arc::new(Broken), ProcessorConfig::default())
            .unwrap(),
    )
    .await;

    let err = processor
        .process_query("doomed", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::PipelineFailed(_)), "got {:?}", err);

    match processor.wait_for_failure().await {
        PipelineHealth::Failed { stage, reason } => {
            assert_eq!(stage, "model");
            assert!(reason.contains("out of memory"));
        }
        other => panic!("unexpected health {:?}", other),
    }

    let err = processor
        .process_query("after", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::PipelineFailed(reason) if reason.starts_with("model")));
    assert_eq!(processor.pending_len().await, 0);
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let processor = Processor::for_model(
        Box::new(NaiveComposer),
        Arc::new(EchoModel::instant()),
        ProcessorConfig::default(),
    )
    .unwrap();

    let err = processor.process_query("early", Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ProcessError::NotRunning));

    processor.start().await.unwrap();
    assert!(matches!(processor.start().await, Err(ProcessError::AlreadyStarted)));
    assert_eq!(processor.health(), PipelineHealth::Running);

    processor.stop().await;
    assert_eq!(processor.health(), PipelineHealth::Stopped);
    let err = processor.process_query("late", Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ProcessError::NotRunning));
}

#[tokio::test]
async fn test_custom_stages_between_codecs() {
    let processor = started(
        Processor::new(vec![Box::new(Shout)], ProcessorConfig::default()).unwrap(),
    )
    .await;

    let result = processor.process_query("hey you!", Duration::from_secs(5)).await.unwrap();
    assert_eq!(result, "HEY YOU!");

    let stages: Vec<&str> = processor.queue_depths().await.iter().map(|d| d.stage).collect();
    assert_eq!(stages, vec!["encode", "shout", "decode"]);
}
