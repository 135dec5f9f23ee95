use ethers::prelude::*;

// The pair contract also exposes getReserves(), but its cached counters are
// computed from transaction-time inputs and can drift from the token balances
// actually held by the pair. The binding omits the getter so nothing in this
// crate can read it by accident; reserves come from ERC-20 balanceOf against
// the pair address (see reconciler.rs).
abigen!(
    IExchangePair,
    r#"[
        event Swap(address indexed sender, uint256 amount0In, uint256 amount1In, uint256 amount0Out, uint256 amount1Out, address indexed to)
        function token0() external view returns (address)
        function token1() external view returns (address)
    ]"#
);
