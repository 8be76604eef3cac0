//! Packet loop orchestration.
//!
//! Reads datagrams from the tunnel, answers blocked queries locally with
//! NXDOMAIN and forwards the rest upstream. Dependencies are trait-based so
//! the loop runs against mock tunnels and resolvers in tests.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument, trace, warn};

use crate::dns::codec::{self, DnsQuery};
use crate::dns::{DnsResolver, DomainMatcher, Verdict};
use crate::error::{Error, Result};
use crate::metrics::{QUERIES_TOTAL, UPSTREAM_FAILURES_TOTAL};
use crate::network::{TunnelReader, TunnelWriter};
use crate::shutdown;
use crate::store::{QueryEvent, QueryEventSink};

/// Counters for one run of the packet loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    /// Datagrams read from the tunnel.
    pub packets_read: u64,
    /// Datagrams that were not DNS queries.
    pub ignored: u64,
    pub blocked: u64,
    pub forwarded: u64,
    /// Datagrams written back to the tunnel.
    pub packets_written: u64,
}

/// Tuning for [`run_packet_loop`].
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Size of the read buffer.
    pub mtu: usize,
    /// Upper bound on concurrent upstream resolutions.
    pub max_inflight: usize,
    /// Capacity of the outbound datagram queue.
    pub channel_capacity: usize,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            mtu: 1500,
            max_inflight: 256,
            channel_capacity: 1024,
        }
    }
}

/// DNS query handler shared by the packet loop and its resolution tasks.
pub struct QueryHandler<R>
where
    R: DnsResolver,
{
    matcher: Arc<DomainMatcher>,
    resolver: R,
    events: Arc<dyn QueryEventSink>,
}

impl<R> QueryHandler<R>
where
    R: DnsResolver,
{
    pub fn new(matcher: Arc<DomainMatcher>, resolver: R, events: Arc<dyn QueryEventSink>) -> Self {
        Self {
            matcher,
            resolver,
            events,
        }
    }

    #[must_use]
    pub fn decide(&self, query: &DnsQuery) -> Verdict {
        self.matcher.decide(&query.domain)
    }

    /// NXDOMAIN datagram answering a blocked query.
    pub fn block(&self, query: &DnsQuery) -> Result<Vec<u8>> {
        Ok(codec::build_negative_response(query)?)
    }

    /// Resolve a query upstream and wrap the answer for its sender.
    #[instrument(skip(self, query), fields(domain = %query.domain, id = query.transaction_id))]
    pub async fn forward(&self, query: &DnsQuery) -> Result<Vec<u8>> {
        let answer = self.resolver.resolve(&query.dns_payload).await?;
        trace!(rcode = ?codec::response_code(&answer), "upstream answered");
        Ok(codec::wrap(query, &answer)?)
    }

    /// Hand the decision to the event sink.
    pub fn record(&self, query: &DnsQuery, blocked: bool) {
        self.events
            .record(QueryEvent::now(query.domain.clone(), blocked));
    }
}

impl<R> Clone for QueryHandler<R>
where
    R: DnsResolver,
{
    fn clone(&self) -> Self {
        Self {
            matcher: Arc::clone(&self.matcher),
            resolver: self.resolver.clone(),
            events: Arc::clone(&self.events),
        }
    }
}

/// Spawn the task owning the tunnel writer.
///
/// Datagrams are written one at a time in queue order. The task ends once
/// every sender is dropped and the queue is drained, and returns how many
/// datagrams were written.
fn spawn_writer<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<u64>
where
    W: TunnelWriter,
{
    tokio::spawn(async move {
        let mut written = 0;
        while let Some(packet) = rx.recv().await {
            match writer.write_packet(&packet).await {
                Ok(()) => written += 1,
                Err(err) => warn!(error = %err, "failed to write packet to tunnel"),
            }
        }
        written
    })
}

fn reap(inflight: &mut JoinSet<()>) {
    while let Some(result) = inflight.try_join_next() {
        if let Err(err) = result
            && err.is_panic()
        {
            warn!(error = %err, "resolution task panicked");
        }
    }
}

/// Run the packet loop until the tunnel closes or shutdown is requested.
///
/// Blocked queries are answered inline. Allowed queries are resolved on
/// their own task, at most `max_inflight` at a time; a failed resolution
/// drops the query without an answer. On exit, pending resolutions are
/// aborted and already queued answers are flushed.
///
/// # Errors
///
/// Returns [`Error::Tunnel`] when reading from the tunnel fails.
pub async fn run_packet_loop<TR, TW, R>(
    mut reader: TR,
    writer: TW,
    handler: QueryHandler<R>,
    options: LoopOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<LoopStats>
where
    TR: TunnelReader,
    TW: TunnelWriter,
    R: DnsResolver,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>(options.channel_capacity.max(1));
    let writer_handle = spawn_writer(writer, rx);
    let semaphore = Arc::new(Semaphore::new(options.max_inflight.max(1)));
    let mut inflight = JoinSet::new();
    let mut stats = LoopStats::default();
    let mut buf = vec![0u8; options.mtu];

    let outcome = loop {
        let read = tokio::select! {
            () = shutdown::requested(&mut shutdown) => break Ok(()),
            read = reader.read_packet(&mut buf) => read,
        };
        let len = match read {
            Ok(0) => {
                debug!("tunnel closed");
                break Ok(());
            }
            Ok(len) => len,
            Err(err) => break Err(Error::Tunnel(err)),
        };
        stats.packets_read += 1;
        reap(&mut inflight);

        let Some(query) = codec::parse(&buf[..len]) else {
            trace!(len, "ignoring non-DNS datagram");
            stats.ignored += 1;
            continue;
        };

        let verdict = handler.decide(&query);
        metrics::counter!(QUERIES_TOTAL, "verdict" => verdict.as_str()).increment(1);
        debug!(domain = %query.domain, verdict = verdict.as_str(), "query");

        match verdict {
            Verdict::Block => {
                stats.blocked += 1;
                match handler.block(&query) {
                    Ok(packet) => {
                        if tx.send(packet).await.is_err() {
                            warn!("tunnel writer stopped");
                        }
                    }
                    Err(err) => warn!(domain = %query.domain, error = %err, "failed to build NXDOMAIN"),
                }
                handler.record(&query, true);
            }
            Verdict::Allow => {
                stats.forwarded += 1;
                let permit = tokio::select! {
                    () = shutdown::requested(&mut shutdown) => break Ok(()),
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    break Ok(());
                };

                handler.record(&query, false);
                let handler = handler.clone();
                let tx = tx.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    match handler.forward(&query).await {
                        Ok(packet) => {
                            if tx.send(packet).await.is_err() {
                                debug!(domain = %query.domain, "tunnel writer stopped, dropping answer");
                            }
                        }
                        Err(err) => {
                            metrics::counter!(UPSTREAM_FAILURES_TOTAL).increment(1);
                            debug!(domain = %query.domain, error = %err, "dropping unanswered query");
                        }
                    }
                });
            }
        }
    };

    inflight.shutdown().await;
    drop(tx);
    match writer_handle.await {
        Ok(written) => stats.packets_written = written,
        Err(err) => warn!(error = %err, "tunnel writer task failed"),
    }

    outcome.map(|()| stats)
}
