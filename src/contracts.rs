//! Typed bindings for the bridge contract deployed on every supported chain

use ethers::contract::abigen;

abigen!(
    BridgeContract,
    r#"[
        event TransferInitiated(bytes32 indexed messageId, address indexed sender, address indexed recipient, uint256 amount, uint256 sourceChainId, uint256 destinationChainId, uint256 timestamp)
        event TransferCompleted(bytes32 indexed messageId, address indexed recipient, uint256 amount, uint256 sourceChainId)
        function completeTransfer(bytes32 messageId, address recipient, uint256 amount, uint256 sourceChainId, bytes signature) external
        function getTransferRecord(bytes32 messageId) external view returns (address, address, uint256, uint256, uint256, uint256, bool, bool)
        function isProcessed(bytes32 messageId) external view returns (bool)
        function getRemainingDailyLimit() external view returns (uint256)
        function getBridgeStats() external view returns (uint256, uint256, uint256, uint256)
    ]"#
);

/// Custom error some bridge deployments raise instead of a reason string
pub const ALREADY_PROCESSED_ERROR: &str = "MessageAlreadyProcessed()";
