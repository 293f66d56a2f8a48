//! Subscription documents for the supported stream kinds.
//!
//! Each kind is a GraphQL subscription document plus the shape of its
//! variables. The payloads are passed through untouched.

use serde_json::{json, Value};

/// A subscription operation ready to be started.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub operation_name: &'static str,
    pub query: &'static str,
    pub variables: Value,
}

pub const QUOTE_OPERATION: &str = "QuoteV2BySecurityIdStream";

pub const QUOTE_QUERY: &str = r#"
subscription QuoteV2BySecurityIdStream($id: ID!, $currency: Currency = null) {
  securityQuoteUpdates(id: $id) {
    id
    quoteV2(currency: $currency) {
      __typename
      securityId
      ask
      bid
      currency
      price
      sessionPrice
      quotedAsOf
      ... on EquityQuote {
        marketStatus
        askSize
        bidSize
        close
        high
        last
        lastSize
        low
        open
        mid
        volume: vol
        referenceClose
        __typename
      }
      ... on OptionQuote {
        marketStatus
        askSize
        bidSize
        close
        high
        last
        lastSize
        low
        open
        mid
        volume: vol
        breakEven
        inTheMoney
        liquidityStatus
        openInterest
        underlyingSpot
        __typename
      }
    }
    __typename
  }
}
"#;

pub const ACTIVITY_OPERATION: &str = "ActivityFeedUpdate";

pub const ACTIVITY_QUERY: &str = r#"
subscription ActivityFeedUpdate {
  activityFeedUpdates {
    accountId
    activityId
    updatedAt
    __typename
  }
}
"#;

pub const IDENTITY_OPERATION: &str = "IdentityAccountCoreUpdates";

pub const IDENTITY_QUERY: &str = r#"
subscription IdentityAccountCoreUpdates($identityId: ID!) {
  identityAccountCoreUpdates(identityId: $identityId) {
    __typename
    ... on AccountUpdate {
      id
      eventName
      __typename
    }
    ... on IdentityUpdate {
      id
      eventName
      __typename
    }
  }
}
"#;

pub const BALANCE_OPERATION: &str = "CustodianAccountBalanceChanges";

pub const BALANCE_QUERY: &str = r#"
subscription CustodianAccountBalanceChanges($custodianAccountIds: [ID!]!) {
  custodianAccountCashBalanceChanges(custodianAccountIds: $custodianAccountIds) {
    id
    __typename
  }
}
"#;

/// Real-time quotes for one security.
pub fn quote(security_id: &str, currency: Option<&str>) -> SubscriptionRequest {
    SubscriptionRequest {
        operation_name: QUOTE_OPERATION,
        query: QUOTE_QUERY,
        variables: json!({ "id": security_id, "currency": currency }),
    }
}

/// Activity feed updates across all accounts.
pub fn activity_feed() -> SubscriptionRequest {
    SubscriptionRequest {
        operation_name: ACTIVITY_OPERATION,
        query: ACTIVITY_QUERY,
        variables: json!({}),
    }
}

/// Identity and account core updates.
pub fn identity_account_core(identity_id: &str) -> SubscriptionRequest {
    SubscriptionRequest {
        operation_name: IDENTITY_OPERATION,
        query: IDENTITY_QUERY,
        variables: json!({ "identityId": identity_id }),
    }
}

/// Cash balance changes for custodian accounts.
pub fn balance_changes<S: AsRef<str>>(custodian_account_ids: &[S]) -> SubscriptionRequest {
    let ids: Vec<&str> = custodian_account_ids.iter().map(AsRef::as_ref).collect();
    SubscriptionRequest {
        operation_name: BALANCE_OPERATION,
        query: BALANCE_QUERY,
        variables: json!({ "custodianAccountIds": ids }),
    }
}

/// Pull `payload.data.securityQuoteUpdates.quoteV2` out of a quote message.
pub fn quote_fields(data: &Value) -> Option<&Value> {
    data.get("securityQuoteUpdates")?.get("quoteV2")
}
