/// Fixed business rule: the platform never holds more than 5 server machines.
pub const MAX_SERVER_MACHINES: usize = 5;

/// Prefix for auto-generated server names (s1, s2, ...).
pub const SERVER_NAME_PREFIX: &str = "s";

pub const LOAD_BALANCER_NAME: &str = "lb";
pub const CLIENT_NAME: &str = "cl";

pub const DEFAULT_IMAGE: &str = "ubuntu1804";

/// The two fixed bridges of the topology. The server-side bridge serves
/// servers and the load balancer; the client-side bridge serves clients
/// and the load balancer.
pub const SERVER_SIDE_BRIDGE: &str = "lxdbr0";
pub const CLIENT_SIDE_BRIDGE: &str = "lxdbr1";

pub const SERVER_SIDE_SUBNET: &str = "10.0.0.0/24";
pub const CLIENT_SIDE_SUBNET: &str = "10.0.1.0/24";

/// Host offset where address allocation starts within a bridge subnet.
pub const FIRST_HOST_OFFSET: u32 = 10;

/// Registry page ids.
pub const MACHINES_PAGE: &str = "machines";
pub const BRIDGES_PAGE: &str = "bridges";
