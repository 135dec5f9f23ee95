use ethers::prelude::*;

abigen!(
    IExchangeFactory,
    r#"[
        event PairCreated(address indexed token0, address indexed token1, address pair, uint256 pairIndex)
        function allPairsLength() external view returns (uint256)
        function allPairs(uint256 index) external view returns (address pair)
    ]"#
);
