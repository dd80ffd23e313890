//! Inline ABI bindings for the factory and collection contracts this worker consumes. No
//! ABI JSON files are available, so every interface is declared with `sol!`'s inline-Solidity
//! syntax instead.

use alloy_sol_types::sol;

sol! {
    interface IFactory {
        event CollectionCreated(address collection, address owner);

        function isRegisteredCollection(address collection) external view returns (bool);
    }

    struct AuctionView {
        bool finished;
        address highestBidder;
        uint256 highestBid;
        string prompt;
    }

    interface ICollection {
        event PromptAuctionFinished(uint256 auctionId, address winner, string prompt);

        function systemPromptUri() external view returns (string memory);
        function creationTimestamp() external view returns (uint64);
        function auctionDuration() external view returns (uint64);

        function getAuction(uint256 auctionId) external view returns (AuctionView memory);

        function eip712Domain()
            external
            view
            returns (
                bytes1 fields,
                string memory name,
                string memory version,
                uint256 chainId,
                address verifyingContract,
                bytes32 salt,
                uint256[] memory extensions
            );

        function finishPromptAuction(uint256 auctionId, string memory uri, bytes memory signature) external;
    }
}
