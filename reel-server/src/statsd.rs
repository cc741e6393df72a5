use reel_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Gauge metrics used by Reel
pub enum ReelGauges {
    /// Number of sessions with negotiated beacon settings on this instance.
    NegotiationSize,
}

impl GaugeMetric for ReelGauges {
    fn name(&self) -> &'static str {
        match self {
            ReelGauges::NegotiationSize => "negotiation.size",
        }
    }
}

/// Distribution metrics used by Reel
pub enum ReelDistributions {
    /// Size of the request body in bytes, after decompression.
    ///
    /// This metric is tagged with:
    /// - `route`: The endpoint that received the request.
    RequestsBodySize,
}

impl DistributionMetric for ReelDistributions {
    fn name(&self) -> &'static str {
        match self {
            ReelDistributions::RequestsBodySize => "requests.body_size",
        }
    }
}

/// Timer metrics used by Reel
pub enum ReelTimers {
    /// Total time spent handling a request, from the first byte to the response.
    ///
    /// This metric is tagged with:
    /// - `route`: The endpoint that received the request.
    /// - `status`: The HTTP status code of the response.
    RequestsDuration,
}

impl TimerMetric for ReelTimers {
    fn name(&self) -> &'static str {
        match self {
            ReelTimers::RequestsDuration => "requests.duration",
        }
    }
}

/// Counter metrics used by Reel
pub enum ReelCounters {
    /// Number of HTTP requests reaching Reel.
    ///
    /// This metric is tagged with:
    /// - `route`: The endpoint that received the request.
    /// - `status`: The HTTP status code of the response.
    /// - `category`: The failure category, or `ok` for successful requests.
    Requests,
    /// Number of sessions minted by start requests.
    ///
    /// This metric is tagged with:
    /// - `platform`: Either `web` or `mobile`.
    SessionStarted,
    /// Number of start requests that continued a running session.
    ///
    /// This metric is tagged with:
    /// - `platform`: Either `web` or `mobile`.
    SessionContinued,
    /// Number of would-be sessions rejected by sampling.
    ///
    /// This metric is tagged with:
    /// - `platform`: Either `web` or `mobile`.
    SessionNotSampled,
    /// Number of session records that could not be stored.
    ///
    /// This metric is tagged with:
    /// - `kind`: Either `started` or `unstarted`.
    SessionStoreError,
    /// Number of messages that could not be handed off to the queue.
    ///
    /// This metric is tagged with:
    /// - `topic`: The logical topic of the message.
    /// - `kind`: The kind of the message.
    EnqueueError,
    /// Number of messages dropped because processing is disabled.
    ///
    /// This metric is tagged with:
    /// - `topic`: The logical topic of the message.
    /// - `kind`: The kind of the message.
    EnqueueDiscarded,
    /// Number of uploaded files that could not be stored.
    ImageUploadError,
    /// Number of negotiated settings removed before their session expired.
    NegotiationEvicted,
}

impl CounterMetric for ReelCounters {
    fn name(&self) -> &'static str {
        match self {
            ReelCounters::Requests => "requests",
            ReelCounters::SessionStarted => "session.started",
            ReelCounters::SessionContinued => "session.continued",
            ReelCounters::SessionNotSampled => "session.not_sampled",
            ReelCounters::SessionStoreError => "session.store.error",
            ReelCounters::EnqueueError => "enqueue.error",
            ReelCounters::EnqueueDiscarded => "enqueue.discarded",
            ReelCounters::ImageUploadError => "image.upload.error",
            ReelCounters::NegotiationEvicted => "negotiation.evicted",
        }
    }
}
