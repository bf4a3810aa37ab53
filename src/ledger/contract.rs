//! ABI of the deployed GreenCredit contract (ERC-20 token plus credit
//! record registry). Only the members the service touches are bound.

alloy::sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract GreenCredit {
        struct CreditRecord {
            address user;
            uint256 esgScore;
            uint256 creditAmount;
            bool approved;
            uint256 timestamp;
            string projectDescription;
            uint256 loanAmount;
        }

        event RecordAdded(
            uint256 indexed id,
            address indexed user,
            uint256 esgScore,
            uint256 creditAmount
        );
        event CreditApproved(uint256 indexed recordId, address indexed user, uint256 loanAmount);
        event TokensRedeemed(address indexed user, uint256 amount, string discount);

        function addRecord(
            uint256 _esgScore,
            uint256 _creditAmount,
            string memory _projectDescription,
            uint256 _loanAmount
        ) external;
        function approveCredit(uint256 _recordId) external;
        function mint(address to, uint256 amount) external;
        function redeemTokens(uint256 _amount) external;

        function getRecord(uint256 _id) external view returns (CreditRecord memory);
        function getUserStats(address _user)
            external
            view
            returns (
                uint256 totalRecords,
                uint256 totalTokens,
                uint256 redeemedAmount,
                uint256 lastRedemption
            );
        function recordCount() external view returns (uint256);

        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function owner() external view returns (address);
    }
}
