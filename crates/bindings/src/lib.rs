//! ABI bindings for the three event families ingested by the indexer.
//!
//! Each family declares a base event and a "with-call" variant that also
//! carries an opaque calldata payload for intents that chain an external
//! call. `topic[1]` is always the intent id, matching the Log Scanner's
//! dedup-key assumption.

use alloy::sol;

sol! {
    #[derive(Debug)]
    interface IntentEvents {
        event IntentCreated(
            bytes32 indexed intentId,
            address indexed creator,
            address token,
            uint256 amount,
            address destinationToken,
            uint256 minAmountOut,
            address receiver,
            uint256 deadline
        );

        event IntentCreatedWithCall(
            bytes32 indexed intentId,
            address indexed creator,
            address token,
            uint256 amount,
            address destinationToken,
            uint256 minAmountOut,
            address receiver,
            uint256 deadline,
            bytes call
        );
    }
}

sol! {
    #[derive(Debug)]
    interface FulfillmentEvents {
        event IntentFulfilled(
            bytes32 indexed intentId,
            address indexed solver,
            address destinationToken,
            uint256 amountOut,
            address receiver
        );

        event IntentFulfilledWithCall(
            bytes32 indexed intentId,
            address indexed solver,
            address destinationToken,
            uint256 amountOut,
            address receiver,
            bytes callResult
        );
    }
}

sol! {
    #[derive(Debug)]
    interface SettlementEvents {
        event IntentSettled(
            bytes32 indexed intentId,
            address indexed solver,
            uint256 settledAmount,
            bool failed
        );

        event IntentSettledWithCall(
            bytes32 indexed intentId,
            address indexed solver,
            uint256 settledAmount,
            bool failed,
            bytes callResult
        );
    }
}
