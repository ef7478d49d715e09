use ethers::prelude::abigen;

// Generates the bindings for the `ChallengeFactory` contract.
abigen!(
    ChallengeFactoryContract,
    r"[
        function createChallenge(address asserter, address challenger, uint256 challengePeriod, bytes32 challengeHash, uint256 challengeType) external returns (address)
        function challenges(address challenge) external view returns (uint256, address, address, bytes32, uint256)
    ]"
);

// Generates the bindings for a `BisectionChallenge` instance. A new instance emits
// `ChallengeCreated` as the only log of its creation transaction.
abigen!(
    BisectionChallenge,
    r"[
        event ChallengeCreated(address indexed asserter, address indexed challenger, uint8 challengeType)
        event Bisected(bytes32[] chainHashes, uint256 chainLength)
        event SegmentChosen(uint256 segmentIndex, bytes32[] chainHashes, uint256 chainLength)
        event OneStepProofSubmitted(bytes32 lowerHashA, bytes32 value)
        function bisect(bytes32[] chainHashes, uint256 chainLength) external
        function chooseSegment(uint256 segmentIndex, bytes32[] chainHashes, uint256 chainLength) external
        function oneStepProof(bytes32 lowerHashA, bytes32 value) external
    ]"
);
