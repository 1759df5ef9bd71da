use alloy::sol;

// Contract interface for the tip relay, generated with the sol! macro.
// The relayer pays gas; the tip itself is authorized by the signature over
// the packed tip digest (see `digest`).
sol! {
    #[sol(rpc)]
    interface ITipRelay {
        event TipSent(
            address indexed from,
            address indexed to,
            address token,
            uint256 amount,
            string contentId,
            uint256 nonce
        );

        function relayTip(
            address from,
            address to,
            address token,
            uint256 amount,
            string contentId,
            uint256 nonce,
            bytes signature
        ) external;

        function tipCountOf(address sender) external view returns (uint256);
    }
}
