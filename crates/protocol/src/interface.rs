//! The fixed 8-entry interface type-code table (spec §9, §10.6).
//!
//! Every declared interface is one of four base kinds, each of which comes
//! in a `Converter` or `Forwarder` variant. The ordering below is the
//! canonical discriminant table even though the numeric values never cross
//! the wire this protocol defines — only the tag strings used in
//! `ConfigureComponent.addInterfaces[].interfaceType` do.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceTypeCode {
    ServiceClientConverter,
    PublisherConverter,
    SubscriberConverter,
    ServiceProviderConverter,
    ServiceClientForwarder,
    PublisherForwarder,
    SubscriberForwarder,
    ServiceProviderForwarder,
}

impl InterfaceTypeCode {
    /// The canonical ordering of the fixed table, index = discriminant.
    pub const ALL: [Self; 8] = [
        Self::ServiceClientConverter,
        Self::PublisherConverter,
        Self::SubscriberConverter,
        Self::ServiceProviderConverter,
        Self::ServiceClientForwarder,
        Self::PublisherForwarder,
        Self::SubscriberForwarder,
        Self::ServiceProviderForwarder,
    ];

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ServiceClientConverter" => Self::ServiceClientConverter,
            "PublisherConverter" => Self::PublisherConverter,
            "SubscriberConverter" => Self::SubscriberConverter,
            "ServiceProviderConverter" => Self::ServiceProviderConverter,
            "ServiceClientForwarder" => Self::ServiceClientForwarder,
            "PublisherForwarder" => Self::PublisherForwarder,
            "SubscriberForwarder" => Self::SubscriberForwarder,
            "ServiceProviderForwarder" => Self::ServiceProviderForwarder,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn is_converter(self) -> bool {
        matches!(
            self,
            Self::ServiceClientConverter
                | Self::PublisherConverter
                | Self::SubscriberConverter
                | Self::ServiceProviderConverter
        )
    }
}

impl fmt::Display for InterfaceTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServiceClientConverter => "ServiceClientConverter",
            Self::PublisherConverter => "PublisherConverter",
            Self::SubscriberConverter => "SubscriberConverter",
            Self::ServiceProviderConverter => "ServiceProviderConverter",
            Self::ServiceClientForwarder => "ServiceClientForwarder",
            Self::PublisherForwarder => "PublisherForwarder",
            Self::SubscriberForwarder => "SubscriberForwarder",
            Self::ServiceProviderForwarder => "ServiceProviderForwarder",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_canonical_layout() {
        assert_eq!(InterfaceTypeCode::ALL[0], InterfaceTypeCode::ServiceClientConverter);
        assert_eq!(InterfaceTypeCode::ALL[7], InterfaceTypeCode::ServiceProviderForwarder);
    }

    #[test]
    fn converter_vs_forwarder() {
        assert!(InterfaceTypeCode::PublisherConverter.is_converter());
        assert!(!InterfaceTypeCode::PublisherForwarder.is_converter());
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        for code in InterfaceTypeCode::ALL {
            assert_eq!(InterfaceTypeCode::parse(&code.to_string()), Some(code));
        }
    }
}
