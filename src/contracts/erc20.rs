use ethers::prelude::abigen;

abigen!(
    Erc20,
    r#"[
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
        function balanceOf(address owner) external view returns (uint256)
    ]"#
);
