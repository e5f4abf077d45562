use kube::CustomResourceExt;
use managed_server::model::ManagedServer;

fn main() {
    print!("{}", serde_yaml::to_string(&ManagedServer::crd()).unwrap())
}
