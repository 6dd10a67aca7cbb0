//! Response protocol negotiation from the `Accept` header.

use mediatype::{MediaType, MediaTypeList};
use std::fmt;

pub const APPLICATION_JSON: &str = "application/json";
pub const MULTIPART_MIXED: &str = "multipart/mixed";
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// How a result is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseProtocol {
    /// A single JSON document.
    Json,
    /// `multipart/mixed` parts, one per patch.
    Multipart,
    /// Server-sent events, one per payload.
    EventStream,
}

impl ResponseProtocol {
    pub const fn media_type(&self) -> &'static str {
        match self {
            Self::Json => APPLICATION_JSON,
            Self::Multipart => MULTIPART_MIXED,
            Self::EventStream => TEXT_EVENT_STREAM,
        }
    }
}

impl fmt::Display for ResponseProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

/// The media types listed by `Accept` headers, in order.
///
/// Parameters (`;q=0.9`, `;charset=...`) are dropped and quality values
/// are not ranked: the order the client wrote is the order of preference.
/// Entries that do not parse as media types are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accept {
    media_types: Vec<String>,
}

impl Accept {
    /// Parses a single `Accept` header value.
    pub fn parse(header: &str) -> Self {
        Self::from_values([header])
    }

    /// Parses every value of a repeated `Accept` header, in order.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let media_types = values
            .into_iter()
            .flat_map(MediaTypeList::new)
            .filter_map(Result::ok)
            .map(|media_type| essence(&media_type))
            .collect();
        Self { media_types }
    }

    /// Returns true if the exact media type is listed.
    ///
    /// Wildcards never count: `*/*` accepts everything but prefers nothing.
    pub fn lists(&self, media_type: &str) -> bool {
        self.position(media_type).is_some()
    }

    pub fn media_types(&self) -> impl Iterator<Item = &str> {
        self.media_types.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.media_types.is_empty()
    }

    /// Protocol for the incremental results of a query or mutation.
    ///
    /// Event streams are used when `text/event-stream` is listed and
    /// `multipart/mixed` is not listed before it. Multipart is the default.
    pub fn streaming_protocol(&self) -> ResponseProtocol {
        match (self.position(TEXT_EVENT_STREAM), self.position(MULTIPART_MIXED)) {
            (Some(sse), Some(multipart)) if multipart < sse => ResponseProtocol::Multipart,
            (Some(_), _) => ResponseProtocol::EventStream,
            (None, _) => ResponseProtocol::Multipart,
        }
    }

    /// Protocol for a subscription answered with a single result.
    ///
    /// Subscriptions stream as events regardless of `Accept`. Only a client
    /// that asked for `application/json` and not for `text/event-stream`
    /// gets a one-shot result as plain JSON.
    pub fn subscription_protocol(&self) -> ResponseProtocol {
        if self.lists(APPLICATION_JSON) && !self.lists(TEXT_EVENT_STREAM) {
            ResponseProtocol::Json
        } else {
            ResponseProtocol::EventStream
        }
    }

    fn position(&self, media_type: &str) -> Option<usize> {
        self.media_types.iter().position(|listed| listed == media_type)
    }
}

fn essence(media_type: &MediaType<'_>) -> String {
    let mut essence = format!("{}/{}", media_type.ty.as_str(), media_type.subty.as_str());
    if let Some(suffix) = &media_type.suffix {
        essence.push('+');
        essence.push_str(suffix.as_str());
    }
    essence.make_ascii_lowercase();
    essence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_parameters() {
        let accept = Accept::parse("Application/JSON; charset=utf-8, text/event-stream;q=0.5, */*");
        assert_eq!(
            accept.media_types().collect::<Vec<_>>(),
            vec!["application/json", "text/event-stream", "*/*"]
        );
        assert!(Accept::default().is_empty());
        assert!(Accept::parse("not a media type").is_empty());
    }

    #[test]
    fn test_parse_keeps_suffix() {
        let accept = Accept::parse("application/graphql-response+json");
        assert!(accept.lists("application/graphql-response+json"));
        assert!(!accept.lists(APPLICATION_JSON));
    }

    #[test]
    fn test_from_values_reads_every_header() {
        let accept = Accept::from_values(["application/json", "text/event-stream"]);
        assert!(accept.lists(APPLICATION_JSON));
        assert!(accept.lists(TEXT_EVENT_STREAM));
        assert_eq!(accept.streaming_protocol(), ResponseProtocol::EventStream);
        assert_eq!(accept.subscription_protocol(), ResponseProtocol::EventStream);
    }

    #[test]
    fn test_streaming_protocol() {
        let protocol = |header: &str| Accept::parse(header).streaming_protocol();

        assert_eq!(Accept::default().streaming_protocol(), ResponseProtocol::Multipart);
        assert_eq!(protocol("*/*"), ResponseProtocol::Multipart);
        assert_eq!(protocol("text/event-stream"), ResponseProtocol::EventStream);
        assert_eq!(
            protocol("application/json, text/event-stream"),
            ResponseProtocol::EventStream
        );
        assert_eq!(
            protocol("multipart/mixed, text/event-stream"),
            ResponseProtocol::Multipart
        );
        assert_eq!(
            protocol("text/event-stream, multipart/mixed"),
            ResponseProtocol::EventStream
        );
    }

    #[test]
    fn test_subscription_protocol() {
        let protocol = |header: &str| Accept::parse(header).subscription_protocol();

        assert_eq!(Accept::default().subscription_protocol(), ResponseProtocol::EventStream);
        assert_eq!(protocol("*/*"), ResponseProtocol::EventStream);
        assert_eq!(protocol("application/json"), ResponseProtocol::Json);
        assert_eq!(
            protocol("application/json, text/event-stream"),
            ResponseProtocol::EventStream
        );
    }
}
